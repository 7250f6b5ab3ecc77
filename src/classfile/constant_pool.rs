//! Per-class constant pool.
//!
//! Entries keep their raw encoding until first use. Reference entries then
//! memoize what they resolved to in a write-once cell next to the entry;
//! resolution is a pure function of immutable bytes, so concurrent resolvers
//! agree on the value and the first publish wins.
use super::reader::Reader;
use crate::{
    error::{Error, Result},
    names::{Name, NameTable},
    storage::ObjectRef,
    types::{
        members::{FieldRef, MethodRef},
        Type, TypeLink, TypeRef,
    },
};
use once_cell::sync::OnceCell;
use std::{
    fmt::{Debug, Formatter},
    ops::Range,
    sync::Arc,
};
use tracing::trace;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstantTag {
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    FieldRef = 9,
    MethodRef = 10,
    InterfaceMethodRef = 11,
    NameAndType = 12,
    MethodHandle = 15,
    MethodType = 16,
    Dynamic = 17,
    InvokeDynamic = 18,
}

impl TryFrom<u8> for ConstantTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            1 => Self::Utf8,
            3 => Self::Integer,
            4 => Self::Float,
            5 => Self::Long,
            6 => Self::Double,
            7 => Self::Class,
            8 => Self::String,
            9 => Self::FieldRef,
            10 => Self::MethodRef,
            11 => Self::InterfaceMethodRef,
            12 => Self::NameAndType,
            15 => Self::MethodHandle,
            16 => Self::MethodType,
            17 => Self::Dynamic,
            18 => Self::InvokeDynamic,
            other => return Err(other),
        })
    }
}

/// Raw, unresolved encoding of one pool slot.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    /// Index 0 and the slot after every `Long`/`Double`.
    Unusable,
    Utf8(Range<usize>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class(u16),
    String(u16),
    MethodType(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
}

impl Entry {
    pub fn tag(&self) -> Option<ConstantTag> {
        Some(match self {
            Self::Unusable => return None,
            Self::Utf8(_) => ConstantTag::Utf8,
            Self::Integer(_) => ConstantTag::Integer,
            Self::Float(_) => ConstantTag::Float,
            Self::Long(_) => ConstantTag::Long,
            Self::Double(_) => ConstantTag::Double,
            Self::Class(_) => ConstantTag::Class,
            Self::String(_) => ConstantTag::String,
            Self::MethodType(_) => ConstantTag::MethodType,
            Self::FieldRef { .. } => ConstantTag::FieldRef,
            Self::MethodRef { .. } => ConstantTag::MethodRef,
            Self::InterfaceMethodRef { .. } => ConstantTag::InterfaceMethodRef,
            Self::NameAndType { .. } => ConstantTag::NameAndType,
            Self::MethodHandle { .. } => ConstantTag::MethodHandle,
            Self::Dynamic { .. } => ConstantTag::Dynamic,
            Self::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
        })
    }
}

#[derive(Clone)]
enum Resolved {
    Name(Name),
    Class(TypeLink),
    String(ObjectRef),
    Field(FieldRef),
    Method(MethodRef),
}

pub struct ConstantPool {
    class: Box<str>,
    bytes: Arc<[u8]>,
    entries: Box<[Entry]>,
    resolved: Box<[OnceCell<Resolved>]>,
}

impl Debug for ConstantPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantPool")
            .field("class", &self.class)
            .field("entries", &self.entries)
            .finish()
    }
}

impl ConstantPool {
    /// Reads the pool count and entries at the reader's position.
    pub fn parse(reader: &mut Reader<'_>, bytes: &Arc<[u8]>, class: &str) -> Result<Self> {
        let count = reader.u2()? as usize;
        if count < 1 {
            return Err(Error::class_format(class, "zero-sized constant pool"));
        }

        let mut entries = vec![Entry::Unusable; count];
        let mut i = 1;
        while i < count {
            let raw = reader.u1()?;
            let tag = ConstantTag::try_from(raw).map_err(|t| {
                Error::class_format(class, format!("wrong constant pool entry type {t} at index {i}"))
            })?;
            entries[i] = match tag {
                ConstantTag::Utf8 => {
                    let len = reader.u2()? as usize;
                    let start = reader.tell();
                    reader.skip(len)?;
                    Entry::Utf8(start..start + len)
                }
                ConstantTag::Integer => Entry::Integer(reader.u4()?),
                ConstantTag::Float => Entry::Float(reader.u4()?),
                ConstantTag::Long | ConstantTag::Double => {
                    if i + 1 >= count {
                        return Err(Error::class_format(
                            class,
                            format!("eight-byte constant at index {i} overflows the pool"),
                        ));
                    }
                    let high = reader.u4()? as u64;
                    let low = reader.u4()? as u64;
                    let value = (high << 32) | low;
                    if tag == ConstantTag::Long {
                        Entry::Long(value)
                    } else {
                        Entry::Double(value)
                    }
                }
                ConstantTag::Class => Entry::Class(reader.u2()?),
                ConstantTag::String => Entry::String(reader.u2()?),
                ConstantTag::MethodType => Entry::MethodType(reader.u2()?),
                ConstantTag::FieldRef => Entry::FieldRef {
                    class: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                ConstantTag::MethodRef => Entry::MethodRef {
                    class: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                ConstantTag::InterfaceMethodRef => Entry::InterfaceMethodRef {
                    class: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                ConstantTag::NameAndType => Entry::NameAndType {
                    name: reader.u2()?,
                    descriptor: reader.u2()?,
                },
                ConstantTag::MethodHandle => Entry::MethodHandle {
                    kind: reader.u1()?,
                    reference: reader.u2()?,
                },
                ConstantTag::Dynamic => Entry::Dynamic {
                    bootstrap: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                ConstantTag::InvokeDynamic => Entry::InvokeDynamic {
                    bootstrap: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
            };
            // The slot after an eight-byte constant stays `Unusable`.
            i += if matches!(tag, ConstantTag::Long | ConstantTag::Double) {
                2
            } else {
                1
            };
        }

        let resolved = (0..count).map(|_| OnceCell::new()).collect();
        Ok(Self {
            class: class.into(),
            bytes: bytes.clone(),
            entries: entries.into_boxed_slice(),
            resolved,
        })
    }

    /// Declared pool size, index 0 included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn entry(&self, idx: u16) -> Result<&Entry> {
        self.check(idx, None)
    }

    pub fn tag_at(&self, idx: u16) -> Result<ConstantTag> {
        self.check(idx, None)?
            .tag()
            .ok_or_else(|| self.error(format!("index {idx} is not a usable constant pool slot")))
    }

    fn check(&self, idx: u16, expected: Option<ConstantTag>) -> Result<&Entry> {
        let i = idx as usize;
        if i == 0 || i >= self.entries.len() {
            return Err(self.error(format!(
                "constant pool index {idx} out of range for pool of size {}",
                self.entries.len()
            )));
        }
        let entry = &self.entries[i];
        let Some(tag) = entry.tag() else {
            return Err(self.error(format!("index {idx} is not a usable constant pool slot")));
        };
        match expected {
            Some(expected) if expected != tag => Err(self.error(format!(
                "wrong constant pool type at index {idx}: expected {expected:?}, found {tag:?}"
            ))),
            _ => Ok(entry),
        }
    }

    fn error(&self, message: String) -> Error {
        Error::class_format(&*self.class, message)
    }

    fn publish(&self, idx: u16, value: Resolved) -> Resolved {
        let cell = &self.resolved[idx as usize];
        let _ = cell.set(value.clone());
        cell.get().cloned().unwrap_or(value)
    }

    pub fn utf8_bytes(&self, idx: u16) -> Result<&[u8]> {
        match self.check(idx, Some(ConstantTag::Utf8))? {
            Entry::Utf8(range) => Ok(&self.bytes[range.clone()]),
            _ => unreachable!("tag checked"),
        }
    }

    pub fn name_at(&self, names: &NameTable, idx: u16) -> Result<Name> {
        let bytes = self.utf8_bytes(idx)?;
        if let Some(Resolved::Name(n)) = self.resolved[idx as usize].get() {
            return Ok(n.clone());
        }
        let name = names
            .intern_bytes(bytes)
            .ok_or_else(|| self.error(format!("malformed modified UTF-8 at index {idx}")))?;
        match self.publish(idx, Resolved::Name(name.clone())) {
            Resolved::Name(n) => Ok(n),
            _ => Ok(name),
        }
    }

    pub fn integer_at(&self, idx: u16) -> Result<i32> {
        match self.check(idx, Some(ConstantTag::Integer))? {
            Entry::Integer(v) => Ok(*v as i32),
            _ => unreachable!("tag checked"),
        }
    }

    pub fn float_at(&self, idx: u16) -> Result<f32> {
        match self.check(idx, Some(ConstantTag::Float))? {
            Entry::Float(v) => Ok(f32::from_bits(*v)),
            _ => unreachable!("tag checked"),
        }
    }

    pub fn long_at(&self, idx: u16) -> Result<i64> {
        match self.check(idx, Some(ConstantTag::Long))? {
            Entry::Long(v) => Ok(*v as i64),
            _ => unreachable!("tag checked"),
        }
    }

    pub fn double_at(&self, idx: u16) -> Result<f64> {
        match self.check(idx, Some(ConstantTag::Double))? {
            Entry::Double(v) => Ok(f64::from_bits(*v)),
            _ => unreachable!("tag checked"),
        }
    }

    /// Name of the class an entry of tag `Class` refers to, without loading it.
    pub fn class_name_at(&self, names: &NameTable, idx: u16) -> Result<Name> {
        match self.check(idx, Some(ConstantTag::Class))? {
            Entry::Class(name) => self.name_at(names, *name),
            _ => unreachable!("tag checked"),
        }
    }

    pub fn name_and_type_at(&self, names: &NameTable, idx: u16) -> Result<(Name, Name)> {
        match self.check(idx, Some(ConstantTag::NameAndType))? {
            Entry::NameAndType { name, descriptor } => {
                Ok((self.name_at(names, *name)?, self.name_at(names, *descriptor)?))
            }
            _ => unreachable!("tag checked"),
        }
    }

    pub fn method_type_at(&self, names: &NameTable, idx: u16) -> Result<Name> {
        match self.check(idx, Some(ConstantTag::MethodType))? {
            Entry::MethodType(descriptor) => self.name_at(names, *descriptor),
            _ => unreachable!("tag checked"),
        }
    }

    /// `(reference kind, reference index)` of a method handle entry.
    pub fn method_handle_at(&self, idx: u16) -> Result<(u8, u16)> {
        match self.check(idx, Some(ConstantTag::MethodHandle))? {
            Entry::MethodHandle { kind, reference } => Ok((*kind, *reference)),
            _ => unreachable!("tag checked"),
        }
    }

    /// `(bootstrap method index, name-and-type index)` of an invokedynamic entry.
    /// Bootstrap method index and `NameAndType` index of a `Dynamic` entry.
    pub fn dynamic_at(&self, idx: u16) -> Result<(u16, u16)> {
        match self.check(idx, Some(ConstantTag::Dynamic))? {
            Entry::Dynamic {
                bootstrap,
                name_and_type,
            } => Ok((*bootstrap, *name_and_type)),
            _ => unreachable!("tag checked"),
        }
    }

    pub fn invoke_dynamic_at(&self, idx: u16) -> Result<(u16, u16)> {
        match self.check(idx, Some(ConstantTag::InvokeDynamic))? {
            Entry::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => Ok((*bootstrap, *name_and_type)),
            _ => unreachable!("tag checked"),
        }
    }

    /// Resolves a `Class` entry through the owner's defining loader.
    pub fn class_at(&self, owner: &Type, idx: u16) -> Result<TypeRef> {
        let loader = owner.loader()?;
        let name = self.class_name_at(loader.names(), idx)?;
        if let Some(Resolved::Class(link)) = self.resolved[idx as usize].get() {
            return link.get();
        }

        let ty = loader.load_or_throw(&name, false).map_err(|e| match e {
            Error::ClassNotFound(n) => Error::NoClassDefFound(n),
            other => other,
        })?;
        trace!("{}: pool #{} -> class {}", self.class, idx, name);
        match self.publish(idx, Resolved::Class(TypeLink::new(&ty))) {
            Resolved::Class(link) => link.get(),
            _ => Ok(ty),
        }
    }

    /// Resolves a `String` entry to the allocator's string object.
    pub fn string_at(&self, owner: &Type, idx: u16) -> Result<ObjectRef> {
        let Entry::String(utf8) = self.check(idx, Some(ConstantTag::String))? else {
            unreachable!("tag checked")
        };
        if let Some(Resolved::String(s)) = self.resolved[idx as usize].get() {
            return Ok(*s);
        }
        let loader = owner.loader()?;
        let value = self.name_at(loader.names(), *utf8)?;
        let object = loader.context().allocator().string(&value)?;
        match self.publish(idx, Resolved::String(object)) {
            Resolved::String(s) => Ok(s),
            _ => Ok(object),
        }
    }

    /// Resolves a `Fieldref`. The caller states whether it expects a static
    /// field; a mismatch with the declaration is an incompatible use.
    pub fn field_at(&self, owner: &Type, idx: u16, is_static: bool) -> Result<FieldRef> {
        let Entry::FieldRef {
            class,
            name_and_type,
        } = self.check(idx, Some(ConstantTag::FieldRef))?
        else {
            unreachable!("tag checked")
        };

        if let Some(Resolved::Field(f)) = self.resolved[idx as usize].get() {
            if f.is_static() != is_static {
                return Err(incompatible("field", f.name(), is_static));
            }
            return Ok(f.clone());
        }

        let loader = owner.loader()?;
        let target = self.class_at(owner, *class)?;
        let (name, descriptor) = self.name_and_type_at(loader.names(), *name_and_type)?;
        let field = if is_static {
            target.find_static_field(&name, &descriptor)?
        } else {
            target.find_virtual_field(&name, &descriptor)?
        };
        match self.publish(idx, Resolved::Field(field.clone())) {
            Resolved::Field(f) => Ok(f),
            _ => Ok(field),
        }
    }

    /// Resolves a `Methodref` as either a static or a virtual method.
    pub fn method_at(&self, owner: &Type, idx: u16, is_static: bool) -> Result<MethodRef> {
        let Entry::MethodRef {
            class,
            name_and_type,
        } = self.check(idx, Some(ConstantTag::MethodRef))?
        else {
            unreachable!("tag checked")
        };
        self.resolve_method(owner, idx, *class, *name_and_type, Some(is_static))
    }

    /// Resolves an `InterfaceMethodref`.
    pub fn interface_method_at(&self, owner: &Type, idx: u16) -> Result<MethodRef> {
        let Entry::InterfaceMethodRef {
            class,
            name_and_type,
        } = self.check(idx, Some(ConstantTag::InterfaceMethodRef))?
        else {
            unreachable!("tag checked")
        };
        self.resolve_method(owner, idx, *class, *name_and_type, None)
    }

    fn resolve_method(
        &self,
        owner: &Type,
        idx: u16,
        class: u16,
        name_and_type: u16,
        is_static: Option<bool>,
    ) -> Result<MethodRef> {
        if let Some(Resolved::Method(m)) = self.resolved[idx as usize].get() {
            if let Some(is_static) = is_static {
                if m.is_static() != is_static {
                    return Err(incompatible("method", m.name(), is_static));
                }
            }
            return Ok(m.clone());
        }

        let loader = owner.loader()?;
        let target = self.class_at(owner, class)?;
        let (name, signature) = self.name_and_type_at(loader.names(), name_and_type)?;
        let method = match is_static {
            Some(true) => target.find_static_method(&name, &signature)?,
            Some(false) => target.find_virtual_method(&name, &signature)?,
            None => target.find_interface_method(&name, &signature)?,
        };
        match self.publish(idx, Resolved::Method(method.clone())) {
            Resolved::Method(m) => Ok(m),
            _ => Ok(method),
        }
    }
}

fn incompatible(what: &str, name: &Name, expected_static: bool) -> Error {
    let (expected, actual) = if expected_static {
        ("static", "virtual")
    } else {
        ("virtual", "static")
    };
    Error::IncompatibleUse(format!(
        "{what} {name} used as {expected} but declared {actual}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::builder::ClassFileBuilder;

    fn pool_of(builder: &ClassFileBuilder) -> ConstantPool {
        let bytes: Arc<[u8]> = builder.build().into();
        let mut r = Reader::new(&bytes, "T");
        r.seek(8).unwrap();
        ConstantPool::parse(&mut r, &bytes, "T").unwrap()
    }

    #[test]
    fn long_and_double_take_two_slots() {
        let mut b = ClassFileBuilder::new("T");
        let l = b.long(0x1122_3344_5566_7788);
        let d = b.double(2.5);
        let i = b.integer(-7);
        let pool = pool_of(&b);

        assert_eq!(d, l + 2);
        assert_eq!(i, d + 2);
        assert_eq!(pool.long_at(l).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(pool.double_at(d).unwrap(), 2.5);
        assert_eq!(pool.integer_at(i).unwrap(), -7);
        // The placeholder after a long is never a valid entry.
        assert!(matches!(pool.tag_at(l + 1), Err(Error::ClassFormat { .. })));
        assert!(matches!(pool.integer_at(l + 1), Err(Error::ClassFormat { .. })));
    }

    #[test]
    fn index_zero_and_out_of_range_are_rejected() {
        let b = ClassFileBuilder::new("T");
        let pool = pool_of(&b);
        assert!(matches!(pool.entry(0), Err(Error::ClassFormat { .. })));
        assert!(matches!(
            pool.entry(pool.len() as u16),
            Err(Error::ClassFormat { .. })
        ));
    }

    #[test]
    fn tag_mismatch_is_a_format_error() {
        let mut b = ClassFileBuilder::new("T");
        let utf8 = b.utf8("hello");
        let pool = pool_of(&b);
        let names = NameTable::new();
        assert!(matches!(
            pool.class_name_at(&names, utf8),
            Err(Error::ClassFormat { .. })
        ));
        assert_eq!(pool.name_at(&names, utf8).unwrap().as_str(), "hello");
    }

    #[test]
    fn names_are_memoized() {
        let mut b = ClassFileBuilder::new("T");
        let idx = b.utf8("memo");
        let pool = pool_of(&b);
        let names = NameTable::new();
        let first = pool.name_at(&names, idx).unwrap();
        let second = pool.name_at(&names, idx).unwrap();
        assert_eq!(first, second);
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn floats_decode_from_bits() {
        let mut b = ClassFileBuilder::new("T");
        let f = b.float(1.5);
        let pool = pool_of(&b);
        assert_eq!(pool.float_at(f).unwrap(), 1.5);
        assert_eq!(pool.tag_at(f).unwrap(), ConstantTag::Float);
    }

    #[test]
    fn unknown_tags_are_rejected() {
        // magic, version, count = 2, tag 2 (unassigned)
        let bytes: Arc<[u8]> = vec![0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 52, 0, 2, 2].into();
        let mut r = Reader::new(&bytes, "T");
        r.seek(8).unwrap();
        let err = ConstantPool::parse(&mut r, &bytes, "T").unwrap_err();
        assert!(matches!(err, Error::ClassFormat { message, .. } if message.contains("type 2")));
    }

    #[test]
    fn dynamic_entries_are_tag_checked() {
        // count = 4: Dynamic(1, 2), InvokeDynamic(3, 4), Utf8 holding a lone surrogate
        let bytes: Arc<[u8]> = vec![
            0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 55, 0, 4, 17, 0, 1, 0, 2, 18, 0, 3, 0, 4, 1, 0, 3,
            0xed, 0xa0, 0x80,
        ]
        .into();
        let mut r = Reader::new(&bytes, "T");
        r.seek(8).unwrap();
        let pool = ConstantPool::parse(&mut r, &bytes, "T").unwrap();

        assert_eq!(pool.dynamic_at(1).unwrap(), (1, 2));
        assert_eq!(pool.invoke_dynamic_at(2).unwrap(), (3, 4));
        assert!(matches!(pool.dynamic_at(2), Err(Error::ClassFormat { .. })));
        assert!(matches!(pool.invoke_dynamic_at(1), Err(Error::ClassFormat { .. })));

        let names = NameTable::new();
        let lone = pool.name_at(&names, 3).unwrap();
        assert_eq!(lone.units(), [0xd800]);
        assert_eq!(lone, names.intern_utf16(&[0xd800]));
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        let bytes: Arc<[u8]> = vec![0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 52, 0, 0].into();
        let mut r = Reader::new(&bytes, "T");
        r.seek(8).unwrap();
        assert!(ConstantPool::parse(&mut r, &bytes, "T").is_err());
    }
}
