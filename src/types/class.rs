use super::{
    members::{Attributes, Field, FieldRef, HiddenField, Method, MethodRef},
    Type, TypeBehavior, TypeLink, TypeRef,
};
use crate::{
    classfile::{
        AccessFlags, AttributeInfo, ClassFile, ConstantPool, ConstantTag, FieldDescriptor,
        MethodDescriptor, PrimitiveKind,
    },
    error::{Error, Result},
    layout::{Layout, LayoutFactory},
    mangle,
    names::{Name, NameTable},
    storage::{FieldStorage, FieldValue},
    vtable::VirtualTable,
};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, trace};

/// A type defined by class-file bytes.
pub struct ClassType {
    bytes: Arc<[u8]>,
    file: OnceCell<ClassFile>,
    fields: OnceCell<Vec<FieldRef>>,
    methods: OnceCell<Vec<MethodRef>>,
    super_class: OnceCell<TypeLink>,
    interfaces: OnceCell<Vec<TypeLink>>,
    static_layout: OnceCell<Layout>,
    instance_layout: OnceCell<Layout>,
    static_storage: OnceCell<Arc<FieldStorage>>,
}

impl ClassType {
    pub(crate) fn new(bytes: Arc<[u8]>) -> Self {
        Self {
            bytes,
            file: OnceCell::new(),
            fields: OnceCell::new(),
            methods: OnceCell::new(),
            super_class: OnceCell::new(),
            interfaces: OnceCell::new(),
            static_layout: OnceCell::new(),
            instance_layout: OnceCell::new(),
            static_storage: OnceCell::new(),
        }
    }

    fn not_yet(&self, what: &str) -> Error {
        Error::IllegalState(format!("{what} is not available yet"))
    }

    pub fn class_file(&self) -> Result<&ClassFile> {
        self.file.get().ok_or_else(|| self.not_yet("class file"))
    }

    pub fn pool(&self) -> Result<&ConstantPool> {
        Ok(&self.class_file()?.pool)
    }

    pub fn access(&self) -> AccessFlags {
        self.file.get().map(|f| f.access).unwrap_or_default()
    }

    pub fn is_interface(&self) -> bool {
        self.access().is_interface()
    }

    /// Declared fields in class-file order, without hidden fields.
    pub fn declared_fields(&self) -> &[FieldRef] {
        self.fields.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn declared_methods(&self) -> &[MethodRef] {
        self.methods.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn declared_method(&self, name: &Name, signature: &Name) -> Option<&MethodRef> {
        self.declared_methods()
            .iter()
            .find(|m| m.name() == name && m.signature() == signature)
    }

    pub fn declared_field(&self, name: &Name, descriptor: &Name) -> Option<&FieldRef> {
        self.declared_fields()
            .iter()
            .find(|f| f.name() == name && f.descriptor() == descriptor)
    }

    pub fn super_class(&self) -> Result<TypeRef> {
        self.super_class
            .get()
            .ok_or_else(|| self.not_yet("superclass"))?
            .get()
    }

    pub fn interfaces(&self) -> Result<Vec<TypeRef>> {
        self.interfaces
            .get()
            .ok_or_else(|| self.not_yet("interface list"))?
            .iter()
            .map(TypeLink::get)
            .collect()
    }

    pub fn static_layout(&self) -> Result<&Layout> {
        self.static_layout
            .get()
            .ok_or_else(|| self.not_yet("static layout"))
    }

    pub fn instance_layout(&self) -> Result<&Layout> {
        self.instance_layout
            .get()
            .ok_or_else(|| self.not_yet("instance layout"))
    }

    /// Static storage, allocated during initialisation.
    pub fn static_storage(&self) -> Result<Arc<FieldStorage>> {
        self.static_storage
            .get()
            .cloned()
            .ok_or_else(|| self.not_yet("static storage"))
    }

    fn read_members(
        ty: &Type,
        file: &ClassFile,
        names: &NameTable,
    ) -> Result<(Vec<FieldRef>, Vec<MethodRef>)> {
        let class = ty.name().as_str();
        let pool = &file.pool;
        let loader = ty.loader()?;
        let well_known = loader.context().well_known();

        let mut fields = Vec::with_capacity(file.fields.len());
        for info in &file.fields {
            let name = pool.name_at(names, info.name_index)?;
            let descriptor = pool.name_at(names, info.descriptor_index)?;
            if FieldDescriptor::parse(descriptor.as_str()).is_none() {
                return Err(Error::class_format(
                    class,
                    format!("malformed descriptor {descriptor} for field {name}"),
                ));
            }
            let attributes = read_attributes(file, names, &info.attributes)?;
            if info.access.is_static() {
                if let Some(value) = attributes.get(&well_known.constant_value) {
                    if value.len() != 2 {
                        return Err(Error::class_format(
                            class,
                            format!("bad ConstantValue attribute length {} on {name}", value.len()),
                        ));
                    }
                }
            }
            fields.push(Arc::new(Field::new(
                name,
                descriptor,
                info.access,
                TypeLink::from_weak(ty.weak()),
                attributes,
                false,
            )));
        }

        let mut methods = Vec::with_capacity(file.methods.len());
        for info in &file.methods {
            let name = pool.name_at(names, info.name_index)?;
            let signature = pool.name_at(names, info.descriptor_index)?;
            if MethodDescriptor::parse(signature.as_str()).is_none() {
                return Err(Error::class_format(
                    class,
                    format!("malformed descriptor {signature} for method {name}"),
                ));
            }
            let initializer = name == well_known.init || name == well_known.clinit;
            methods.push(Arc::new(Method::new(
                name,
                signature,
                info.access,
                TypeLink::from_weak(ty.weak()),
                read_attributes(file, names, &info.attributes)?,
                initializer,
            )));
        }

        Ok((fields, methods))
    }

    /// Writes a `ConstantValue` into static storage. The constant's pool tag
    /// must agree with the field's type.
    fn apply_constant(
        &self,
        ty: &Type,
        field: &Field,
        storage: &FieldStorage,
        index: u16,
    ) -> Result<()> {
        let pool = self.pool()?;
        let tag = pool.tag_at(index)?;
        let descriptor = field.parsed_descriptor()?;
        let loader = ty.loader()?;
        let string_class = loader.context().well_known().string.as_str();

        let value = match (tag, descriptor) {
            (ConstantTag::Long, FieldDescriptor::Primitive(PrimitiveKind::Long)) => {
                Some(FieldValue::Long(pool.long_at(index)?))
            }
            (ConstantTag::Float, FieldDescriptor::Primitive(PrimitiveKind::Float)) => {
                Some(FieldValue::Float(pool.float_at(index)?))
            }
            (ConstantTag::Double, FieldDescriptor::Primitive(PrimitiveKind::Double)) => {
                Some(FieldValue::Double(pool.double_at(index)?))
            }
            (ConstantTag::Integer, FieldDescriptor::Primitive(kind)) => {
                FieldValue::from_int(kind, pool.integer_at(index)?)
            }
            (ConstantTag::String, FieldDescriptor::Class(c)) if c == string_class => {
                Some(FieldValue::Reference(pool.string_at(ty, index)?))
            }
            _ => None,
        };
        let value = value.ok_or_else(|| {
            Error::class_format(
                ty.name().as_str(),
                format!(
                    "constant of type {tag:?} cannot initialise field {} {}",
                    field.descriptor(),
                    field.name()
                ),
            )
        })?;

        let offset = field
            .offset()
            .ok_or_else(|| Error::internal(format!("field {} has no offset", field.name())))?;
        trace!("{}: {} = {value:?}", ty.name(), field.name());
        storage.write(offset, value)
    }
}

fn read_attributes(
    file: &ClassFile,
    names: &NameTable,
    infos: &[AttributeInfo],
) -> Result<Attributes> {
    let entries = infos
        .iter()
        .map(|a| Ok((file.pool.name_at(names, a.name_index)?, a.data.clone())))
        .collect::<Result<Vec<_>>>()?;
    Ok(Attributes::new(file.bytes.clone(), entries))
}

impl TypeBehavior for ClassType {
    fn attach(&self, ty: &Type) -> Result<()> {
        let loader = ty.loader()?;
        let file = ClassFile::parse(self.bytes.clone(), ty.name().as_str())?;
        let names = loader.names();
        let declared = file.pool.class_name_at(names, file.this_class)?;
        if declared != *ty.name() {
            return Err(Error::class_format(
                ty.name().as_str(),
                format!("class file describes {declared}"),
            ));
        }

        let (fields, methods) = Self::read_members(ty, &file, names)?;
        debug!(
            "{}: {} fields, {} methods, version {}.{}",
            ty.name(),
            fields.len(),
            methods.len(),
            file.major_version,
            file.minor_version
        );
        let _ = self.fields.set(fields);
        let _ = self.methods.set(methods);
        let _ = self.file.set(file);
        Ok(())
    }

    fn link(&self, ty: &Type, hidden: &[HiddenField]) -> Result<()> {
        let loader = ty.loader()?;
        let names = loader.names();
        let well_known = loader.context().well_known();
        let file = self.class_file()?;
        let class = ty.name().as_str();

        let parent = if file.super_class == 0 {
            if *ty.name() != well_known.object {
                return Err(Error::class_format(class, "missing superclass"));
            }
            None
        } else {
            let parent = file.pool.class_at(ty, file.super_class)?;
            if parent.as_ref() == ty {
                return Err(Error::ClassCircularity(class.to_string()));
            }
            parent.resolve()?;
            if !parent.is_class() || parent.is_interface() {
                return Err(Error::class_format(
                    class,
                    format!("superclass {} is not a class", parent.name()),
                ));
            }
            Some(parent)
        };

        let mut interfaces = Vec::with_capacity(file.interfaces.len());
        for idx in &file.interfaces {
            let interface = file.pool.class_at(ty, *idx)?;
            interface.resolve()?;
            if !interface.is_interface() {
                return Err(Error::class_format(
                    class,
                    format!("{} is not an interface", interface.name()),
                ));
            }
            interfaces.push(TypeLink::new(&interface));
        }

        let mut statics = vec![];
        let mut instance = vec![];
        for h in hidden {
            let descriptor = names.intern(&h.descriptor);
            if FieldDescriptor::parse(descriptor.as_str()).is_none() {
                return Err(Error::class_format(
                    class,
                    format!("malformed descriptor {descriptor} for hidden field {}", h.name),
                ));
            }
            let field = Arc::new(Field::new(
                names.intern(&h.name),
                descriptor,
                h.access,
                TypeLink::from_weak(ty.weak()),
                Attributes::default(),
                true,
            ));
            if field.is_static() {
                statics.push(field);
            } else {
                instance.push(field);
            }
        }
        for f in self.declared_fields() {
            if f.is_static() {
                statics.push(f.clone());
            } else {
                instance.push(f.clone());
            }
        }

        let (static_methods, instance_methods): (Vec<MethodRef>, Vec<MethodRef>) = self
            .declared_methods()
            .iter()
            .cloned()
            .partition(|m| m.is_static());

        let parent_class = parent.as_ref().map(|p| p.as_class()).transpose()?;
        let parent_layout = parent_class.map(|p| p.instance_layout()).transpose()?;
        let instance_layout =
            LayoutFactory::instance(class, parent_layout, instance, instance_methods)?;
        let static_layout = LayoutFactory::statics(class, statics, static_methods)?;

        let parent_vtable = parent.as_ref().map(|p| p.vtable()).transpose()?;
        let vtable = VirtualTable::build(class, parent_vtable.as_deref(), self.declared_methods());
        debug!(
            "{}: instance size {}, static size {}, {} vtable slots",
            class,
            instance_layout.size(),
            static_layout.size(),
            vtable.len()
        );

        let super_link = match &parent {
            Some(p) => TypeLink::new(p),
            None => TypeLink::from_weak(ty.weak()),
        };
        let _ = self.super_class.set(super_link);
        let _ = self.interfaces.set(interfaces);
        let _ = self.instance_layout.set(instance_layout);
        let _ = self.static_layout.set(static_layout);
        ty.set_vtable(Arc::new(vtable));
        Ok(())
    }

    fn prepare(&self, ty: &Type) -> Result<()> {
        let loader = ty.loader()?;
        let layout = self.static_layout()?;
        let storage = loader
            .context()
            .allocator()
            .allocate(ty.name(), layout, layout.size())?;
        let well_known = loader.context().well_known();
        for field in layout.fields() {
            if let Some(value) = field.attributes().get(&well_known.constant_value) {
                let index = u16::from_be_bytes([value[0], value[1]]);
                self.apply_constant(ty, field, &storage, index)?;
            }
        }
        let _ = self.static_storage.set(storage);
        Ok(())
    }

    fn run_initializer(&self, ty: &Type) -> Result<()> {
        if let Some(parent) = ty.parent()? {
            parent.initialise()?;
        }
        for interface in self.interfaces()? {
            interface.initialise()?;
        }

        let loader = ty.loader()?;
        let well_known = loader.context().well_known();
        let Some(clinit) = self
            .declared_method(&well_known.clinit, &well_known.void_signature)
            .filter(|m| m.is_static())
        else {
            return Ok(());
        };
        debug!("running {}.<clinit>", ty.name());
        loader.context().interpreter().invoke_static(clinit)
    }

    fn descriptor(&self, ty: &Type) -> String {
        format!("L{};", ty.name())
    }

    fn native_name(&self, ty: &Type) -> Result<String> {
        Ok(mangle::class_native_name(ty.name().as_str()))
    }
}

impl ClassType {
    /// Symbol under which precompiled code finds this class's statics.
    pub fn static_native_name(&self, ty: &Type) -> String {
        mangle::static_native_name(ty.name().as_str())
    }
}
