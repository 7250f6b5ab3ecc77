//! Class-file decoding: byte reader, constant pool, structural parser and
//! descriptor grammar.
use crate::error::{Error, Result};
use bitflags::bitflags;

pub mod builder;
pub mod constant_pool;
pub mod descriptor;
pub mod parser;
pub mod reader;

pub use constant_pool::{ConstantPool, ConstantTag, Entry};
pub use descriptor::{FieldDescriptor, MethodDescriptor, PrimitiveKind};
pub use parser::{AttributeInfo, ClassFile, MemberInfo};
pub use reader::Reader;

pub const MAGIC: u32 = 0xCAFE_BABE;

/// Leading marker of an array descriptor.
pub const ARRAY_MARKER: char = '[';
pub const CLASS_MARKER: char = 'L';
pub const CLASS_END: char = ';';

bitflags! {
    /// Access and property flags shared by classes, fields and methods.
    /// Some bits mean different things depending on where they appear.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

impl AccessFlags {
    pub fn from_raw(bits: u16) -> Self {
        Self::from_bits_retain(bits)
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }
}

/// Replaces the source-level package separator with the internal one.
///
/// A literal `/` in the source form is ambiguous and rejected.
pub fn internal_class_name(source: &str) -> Result<String> {
    if source.is_empty() || source.contains('/') {
        return Err(Error::IllegalName(source.to_string()));
    }
    Ok(source.replace('.', "/"))
}
