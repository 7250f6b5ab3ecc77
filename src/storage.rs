use crate::{
    classfile::PrimitiveKind,
    error::{Error, Result},
};
use parking_lot::RwLock;
use std::{
    fmt::{Debug, Formatter},
    mem::size_of,
};

/// Opaque handle to a heap object handed out by an [`crate::vm::Allocator`].
/// Zero is the null reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub usize);

impl ObjectRef {
    pub const NULL: ObjectRef = ObjectRef(0);
    pub const SIZE: usize = size_of::<usize>();

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A value stored into a field slot, tagged with its natural width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Reference(ObjectRef),
}

impl FieldValue {
    pub fn width(&self) -> usize {
        match self {
            Self::Boolean(_) | Self::Byte(_) => 1,
            Self::Char(_) | Self::Short(_) => 2,
            Self::Int(_) | Self::Float(_) => 4,
            Self::Long(_) | Self::Double(_) => 8,
            Self::Reference(_) => ObjectRef::SIZE,
        }
    }

    fn encode(&self) -> Vec<u8> {
        match *self {
            Self::Boolean(v) => vec![v as u8],
            Self::Byte(v) => v.to_ne_bytes().to_vec(),
            Self::Char(v) => v.to_ne_bytes().to_vec(),
            Self::Short(v) => v.to_ne_bytes().to_vec(),
            Self::Int(v) => v.to_ne_bytes().to_vec(),
            Self::Float(v) => v.to_ne_bytes().to_vec(),
            Self::Long(v) => v.to_ne_bytes().to_vec(),
            Self::Double(v) => v.to_ne_bytes().to_vec(),
            Self::Reference(r) => r.0.to_ne_bytes().to_vec(),
        }
    }

    /// Narrows a pool `Integer` to the width a field of `kind` stores.
    pub fn from_int(kind: PrimitiveKind, value: i32) -> Option<Self> {
        Some(match kind {
            PrimitiveKind::Boolean => Self::Boolean(value != 0),
            PrimitiveKind::Byte => Self::Byte(value as i8),
            PrimitiveKind::Char => Self::Char(value as u16),
            PrimitiveKind::Short => Self::Short(value as i16),
            PrimitiveKind::Int => Self::Int(value),
            _ => return None,
        })
    }
}

/// Raw bytes backing a static layout, zeroed at allocation.
pub struct FieldStorage {
    owner: String,
    data: RwLock<Box<[u8]>>,
}

impl Debug for FieldStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldStorage")
            .field("owner", &self.owner)
            .field("size", &self.size())
            .finish()
    }
}

impl FieldStorage {
    pub fn new(owner: impl Into<String>, size: usize) -> Self {
        Self {
            owner: owner.into(),
            data: RwLock::new(vec![0; size].into_boxed_slice()),
        }
    }

    pub fn size(&self) -> usize {
        self.data.read().len()
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        if offset + len > self.size() {
            return Err(Error::internal(format!(
                "access of {len} bytes at offset {offset} outside {} storage of {} bytes",
                self.owner,
                self.size()
            )));
        }
        Ok(())
    }

    pub fn write(&self, offset: usize, value: FieldValue) -> Result<()> {
        let bytes = value.encode();
        self.check(offset, bytes.len())?;
        self.data.write()[offset..offset + bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.check(offset, len)?;
        Ok(self.data.read()[offset..offset + len].to_vec())
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        let b = self.read_bytes(offset, 4)?;
        Ok(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&self, offset: usize) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.read_bytes(offset, 8)?);
        Ok(i64::from_ne_bytes(buf))
    }

    pub fn read_f32(&self, offset: usize) -> Result<f32> {
        self.read_i32(offset).map(|v| f32::from_bits(v as u32))
    }

    pub fn read_f64(&self, offset: usize) -> Result<f64> {
        self.read_i64(offset).map(|v| f64::from_bits(v as u64))
    }

    pub fn read_i16(&self, offset: usize) -> Result<i16> {
        let b = self.read_bytes(offset, 2)?;
        Ok(i16::from_ne_bytes([b[0], b[1]]))
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.read_bytes(offset, 1)?[0])
    }

    pub fn read_reference(&self, offset: usize) -> Result<ObjectRef> {
        let mut buf = [0u8; ObjectRef::SIZE];
        buf.copy_from_slice(&self.read_bytes(offset, ObjectRef::SIZE)?);
        Ok(ObjectRef(usize::from_ne_bytes(buf)))
    }
}
