use super::{TypeLink, TypeRef};
use crate::{
    classfile::{AccessFlags, FieldDescriptor, MethodDescriptor, Reader},
    error::{Error, Result},
    mangle,
    names::Name,
};
use once_cell::sync::OnceCell;
use std::{
    fmt::{Debug, Formatter},
    ops::Range,
    sync::Arc,
};
use tracing::debug;

pub type FieldRef = Arc<Field>;
pub type MethodRef = Arc<Method>;

/// Address of a bound native implementation.
pub type NativeAddress = usize;

/// Raw attributes of one member, keyed by interned name.
#[derive(Clone, Default)]
pub struct Attributes {
    bytes: Option<Arc<[u8]>>,
    entries: Vec<(Name, Range<usize>)>,
}

impl Attributes {
    pub fn new(bytes: Arc<[u8]>, entries: Vec<(Name, Range<usize>)>) -> Self {
        Self {
            bytes: Some(bytes),
            entries,
        }
    }

    pub fn get(&self, name: &Name) -> Option<&[u8]> {
        let bytes = self.bytes.as_ref()?;
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| &bytes[r.clone()])
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.entries.iter().map(|(n, _)| n)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A field the loader adds to a class before any declared field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HiddenField {
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
}

impl HiddenField {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access: AccessFlags) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
        }
    }
}

pub struct Field {
    name: Name,
    descriptor: Name,
    access: AccessFlags,
    declaring: TypeLink,
    attributes: Attributes,
    offset: OnceCell<usize>,
    hidden: bool,
}

impl Debug for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.descriptor, self.name)?;
        if let Some(o) = self.offset.get() {
            write!(f, " @{o}")?;
        }
        Ok(())
    }
}

impl Field {
    pub(crate) fn new(
        name: Name,
        descriptor: Name,
        access: AccessFlags,
        declaring: TypeLink,
        attributes: Attributes,
        hidden: bool,
    ) -> Self {
        Self {
            name,
            descriptor,
            access,
            declaring,
            attributes,
            offset: OnceCell::new(),
            hidden,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn descriptor(&self) -> &Name {
        &self.descriptor
    }

    pub fn access(&self) -> AccessFlags {
        self.access
    }

    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn declaring_type(&self) -> Result<TypeRef> {
        self.declaring.get()
    }

    pub fn parsed_descriptor(&self) -> Result<FieldDescriptor<'_>> {
        FieldDescriptor::parse(self.descriptor.as_str()).ok_or_else(|| {
            Error::class_format(
                self.declaring
                    .name()
                    .unwrap_or_else(|| self.name.to_string()),
                format!("malformed field descriptor {}", self.descriptor),
            )
        })
    }

    /// Width of the slot this field occupies.
    pub fn width(&self) -> Result<usize> {
        Ok(self.parsed_descriptor()?.width())
    }

    /// Byte offset within the declaring layout, once the layout is built.
    pub fn offset(&self) -> Option<usize> {
        self.offset.get().copied()
    }

    pub(crate) fn assign_offset(&self, offset: usize) -> Result<()> {
        self.offset
            .set(offset)
            .map_err(|_| Error::internal(format!("field {} laid out twice", self.name)))
    }

    /// Loads the field's value type through the declaring type's loader.
    pub fn value_type(&self) -> Result<TypeRef> {
        let declaring = self.declaring_type()?;
        let loader = declaring.loader()?;
        loader.type_for_descriptor(self.descriptor.as_str())
    }
}

pub struct Method {
    name: Name,
    signature: Name,
    access: AccessFlags,
    declaring: TypeLink,
    attributes: Attributes,
    initializer: bool,
    slot: OnceCell<usize>,
    native: OnceCell<NativeAddress>,
}

impl Debug for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.signature)?;
        if let Some(s) = self.slot.get() {
            write!(f, " [slot {s}]")?;
        }
        Ok(())
    }
}

impl Method {
    pub(crate) fn new(
        name: Name,
        signature: Name,
        access: AccessFlags,
        declaring: TypeLink,
        attributes: Attributes,
        initializer: bool,
    ) -> Self {
        Self {
            name,
            signature,
            access,
            declaring,
            attributes,
            initializer,
            slot: OnceCell::new(),
            native: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn signature(&self) -> &Name {
        &self.signature
    }

    pub fn access(&self) -> AccessFlags {
        self.access
    }

    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }

    pub fn is_native(&self) -> bool {
        self.access.is_native()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn declaring_type(&self) -> Result<TypeRef> {
        self.declaring.get()
    }

    pub fn descriptor(&self) -> Result<MethodDescriptor<'_>> {
        MethodDescriptor::parse(self.signature.as_str()).ok_or_else(|| {
            Error::class_format(
                self.declaring
                    .name()
                    .unwrap_or_else(|| self.name.to_string()),
                format!("malformed method descriptor {}", self.signature),
            )
        })
    }

    /// Whether this method takes part in virtual dispatch.
    pub fn is_virtual(&self) -> bool {
        !self.access.is_static() && !self.access.is_private() && !self.initializer
    }

    /// `<init>` or `<clinit>`.
    pub fn is_initializer(&self) -> bool {
        self.initializer
    }

    /// Virtual table slot, assigned when the declaring class resolves.
    pub fn slot(&self) -> Option<usize> {
        self.slot.get().copied()
    }

    pub(crate) fn assign_slot(&self, slot: usize) {
        let _ = self.slot.set(slot);
    }

    /// The `code` array of the `Code` attribute, if the method has one.
    pub fn bytecode(&self) -> Result<Option<&[u8]>> {
        let loader = self.declaring_type()?.loader()?;
        let Some(code) = self.attributes.get(&loader.context().well_known().code) else {
            return Ok(None);
        };
        let class = self
            .declaring
            .name()
            .unwrap_or_else(|| self.name.to_string());
        code_array(code)
            .map(Some)
            .map_err(|_| Error::class_format(class, format!("truncated Code attribute in {}", self.name)))
    }

    pub fn native_address(&self) -> Option<NativeAddress> {
        self.native.get().copied()
    }

    /// Binds an explicit native implementation. The first binding wins.
    pub fn register_native(&self, address: NativeAddress) -> Result<()> {
        if !self.is_native() {
            return Err(self.no_such_method());
        }
        let _ = self.native.set(address);
        Ok(())
    }

    /// Looks the implementation up through the declaring loader's native
    /// search order, trying the short symbol and then the overloaded one.
    pub fn bind_native(&self) -> Result<NativeAddress> {
        if let Some(address) = self.native.get() {
            return Ok(*address);
        }
        if !self.is_native() {
            return Err(self.no_such_method());
        }
        let declaring = self.declaring_type()?;
        let loader = declaring.loader()?;
        let parameters = self.descriptor()?.parameter_text;
        let candidates = [
            mangle::jni_name(declaring.name().as_str(), self.name.as_str()),
            mangle::overloaded_jni_name(
                declaring.name().as_str(),
                self.name.as_str(),
                parameters,
            ),
        ];
        for symbol in &candidates {
            if let Some(address) = loader.native_lookup(symbol) {
                debug!("bound native {}.{} to {}", declaring.name(), self.name, symbol);
                return Ok(*self.native.get_or_init(|| address));
            }
        }
        Err(Error::UnsatisfiedLink(format!(
            "{}.{}{}",
            declaring.name(),
            self.name,
            self.signature
        )))
    }

    fn no_such_method(&self) -> Error {
        Error::NoSuchMethod {
            class: self.declaring.name().unwrap_or_default(),
            name: self.name.to_string(),
            signature: self.signature.to_string(),
        }
    }
}

/// Skips `max_stack` and `max_locals` and returns the code array.
fn code_array(attribute: &[u8]) -> Result<&[u8]> {
    let mut r = Reader::new(attribute, "");
    r.skip(4)?;
    let len = r.u4()? as usize;
    r.take(len)
}
