use super::{HiddenField, Type, TypeBehavior, TypeLink, TypeRef};
use crate::{
    error::{Error, Result},
    mangle,
};
use tracing::trace;

/// Array type synthesized from its component. Defined by the component's
/// loader and never read from class bytes.
#[derive(Debug)]
pub struct ArrayType {
    component: TypeLink,
    dimensions: usize,
}

impl ArrayType {
    pub(crate) fn new(component: &TypeRef) -> Self {
        let dimensions = match component.as_array() {
            Ok(inner) => inner.dimensions + 1,
            Err(_) => 1,
        };
        Self {
            component: TypeLink::new(component),
            dimensions,
        }
    }

    pub fn component(&self) -> Result<TypeRef> {
        self.component.get()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The innermost non-array component.
    pub fn element(&self) -> Result<TypeRef> {
        let mut ty = self.component()?;
        while let Ok(inner) = ty.as_array() {
            let next = inner.component()?;
            ty = next;
        }
        Ok(ty)
    }
}

impl TypeBehavior for ArrayType {
    fn attach(&self, _ty: &Type) -> Result<()> {
        Ok(())
    }

    fn link(&self, ty: &Type, hidden: &[HiddenField]) -> Result<()> {
        if !hidden.is_empty() {
            return Err(Error::IllegalState(format!(
                "array type {} cannot carry hidden fields",
                ty.name()
            )));
        }
        self.component()?.resolve()?;
        let object = ty.loader()?.object_class()?;
        object.resolve()?;
        ty.set_vtable(object.vtable()?);
        trace!("{} shares the virtual table of {}", ty.name(), object.name());
        Ok(())
    }

    fn prepare(&self, _ty: &Type) -> Result<()> {
        Ok(())
    }

    fn run_initializer(&self, _ty: &Type) -> Result<()> {
        Ok(())
    }

    fn descriptor(&self, ty: &Type) -> String {
        ty.name().to_string()
    }

    fn native_name(&self, _ty: &Type) -> Result<String> {
        let component = self.component()?;
        Ok(mangle::array_native_name(component.native_name()?))
    }
}
