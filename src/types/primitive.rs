use super::{HiddenField, Type, TypeBehavior};
use crate::{classfile::PrimitiveKind, error::Result};

/// One of the preallocated primitive singletons. Born initialised.
#[derive(Debug)]
pub struct PrimitiveType {
    kind: PrimitiveKind,
}

impl PrimitiveType {
    pub(crate) fn new(kind: PrimitiveKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.kind.size()
    }
}

impl TypeBehavior for PrimitiveType {
    fn attach(&self, _ty: &Type) -> Result<()> {
        Ok(())
    }

    fn link(&self, _ty: &Type, _hidden: &[HiddenField]) -> Result<()> {
        Ok(())
    }

    fn prepare(&self, _ty: &Type) -> Result<()> {
        Ok(())
    }

    fn run_initializer(&self, _ty: &Type) -> Result<()> {
        Ok(())
    }

    fn descriptor(&self, _ty: &Type) -> String {
        self.kind.id().to_string()
    }

    fn native_name(&self, _ty: &Type) -> Result<String> {
        Ok(self.kind.id().to_string())
    }
}
