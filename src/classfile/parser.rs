use super::{constant_pool::ConstantPool, reader::Reader, AccessFlags, MAGIC};
use crate::error::{Error, Result};
use std::{ops::Range, sync::Arc};

/// An attribute whose payload is left undecoded; `data` indexes the class bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name_index: u16,
    pub data: Range<usize>,
}

impl AttributeInfo {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A field or method record as it appears in the class file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberInfo {
    pub access: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

/// Structural decoding of one class file. Names are still pool indices.
#[derive(Debug)]
pub struct ClassFile {
    pub bytes: Arc<[u8]>,
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access: AccessFlags,
    pub this_class: u16,
    /// Zero for the root class.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    /// `class` is the name the bytes were requested under, used for errors.
    pub fn parse(bytes: Arc<[u8]>, class: &str) -> Result<Self> {
        let mut r = Reader::new(&bytes, class);

        let magic = r.u4()?;
        if magic != MAGIC {
            return Err(Error::class_format(
                class,
                format!("bad magic number {magic:#010x}"),
            ));
        }
        let minor_version = r.u2()?;
        let major_version = r.u2()?;
        let pool = ConstantPool::parse(&mut r, &bytes, class)?;
        let access = AccessFlags::from_raw(r.u2()?);
        let this_class = r.u2()?;
        let super_class = r.u2()?;

        let interface_count = r.u2()?;
        let interfaces = (0..interface_count)
            .map(|_| r.u2())
            .collect::<Result<Vec<_>>>()?;

        let fields = read_members(&mut r)?;
        let methods = read_members(&mut r)?;
        let attributes = read_attributes(&mut r)?;

        if r.remaining() != 0 {
            return Err(Error::class_format(
                class,
                format!("{} trailing bytes after the last attribute", r.remaining()),
            ));
        }

        Ok(Self {
            bytes: bytes.clone(),
            minor_version,
            major_version,
            pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn attribute_bytes(&self, attribute: &AttributeInfo) -> &[u8] {
        &self.bytes[attribute.data.clone()]
    }
}

fn read_members(r: &mut Reader<'_>) -> Result<Vec<MemberInfo>> {
    let count = r.u2()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        members.push(MemberInfo {
            access: AccessFlags::from_raw(r.u2()?),
            name_index: r.u2()?,
            descriptor_index: r.u2()?,
            attributes: read_attributes(r)?,
        });
    }
    Ok(members)
}

fn read_attributes(r: &mut Reader<'_>) -> Result<Vec<AttributeInfo>> {
    let count = r.u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.u2()?;
        let len = r.u4()? as usize;
        let start = r.tell();
        r.skip(len)?;
        attributes.push(AttributeInfo {
            name_index,
            data: start..start + len,
        });
    }
    Ok(attributes)
}
