//! Assembles class files in memory.
//!
//! Used by tests and by embedders that synthesize classes at runtime. The
//! builder writes structurally valid files; it does not check that the
//! descriptors it is given make sense.
use super::{constant_pool::ConstantTag, AccessFlags, MAGIC};
use std::collections::HashMap;

/// Opcode of `return`, the body of every method given no explicit code.
pub const RETURN: u8 = 0xb1;

struct Member {
    access: AccessFlags,
    name: u16,
    descriptor: u16,
    attributes: Vec<(u16, Vec<u8>)>,
}

pub struct ClassFileBuilder {
    pool: Vec<u8>,
    pool_count: u16,
    interned: HashMap<Vec<u8>, u16>,
    access: AccessFlags,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Member>,
    methods: Vec<Member>,
    major_version: u16,
}

impl ClassFileBuilder {
    pub fn new(name: &str) -> Self {
        let mut b = Self {
            pool: vec![],
            pool_count: 1,
            interned: HashMap::new(),
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            major_version: 52,
        };
        b.this_class = b.class(name);
        b
    }

    fn push(&mut self, encoded: Vec<u8>, slots: u16) -> u16 {
        if let Some(idx) = self.interned.get(&encoded) {
            return *idx;
        }
        let idx = self.pool_count;
        self.pool.extend_from_slice(&encoded);
        self.pool_count += slots;
        self.interned.insert(encoded, idx);
        idx
    }

    fn pair(&mut self, tag: ConstantTag, a: u16, b: u16) -> u16 {
        let mut e = vec![tag as u8];
        e.extend_from_slice(&a.to_be_bytes());
        e.extend_from_slice(&b.to_be_bytes());
        self.push(e, 1)
    }

    /// Adds a `Utf8` entry with modified UTF-8 encoding.
    pub fn utf8(&mut self, text: &str) -> u16 {
        let bytes = encode_modified_utf8(text);
        let mut e = vec![ConstantTag::Utf8 as u8];
        e.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        e.extend_from_slice(&bytes);
        self.push(e, 1)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let n = self.utf8(name);
        let mut e = vec![ConstantTag::Class as u8];
        e.extend_from_slice(&n.to_be_bytes());
        self.push(e, 1)
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let n = self.utf8(value);
        let mut e = vec![ConstantTag::String as u8];
        e.extend_from_slice(&n.to_be_bytes());
        self.push(e, 1)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut e = vec![ConstantTag::Integer as u8];
        e.extend_from_slice(&value.to_be_bytes());
        self.push(e, 1)
    }

    pub fn float(&mut self, value: f32) -> u16 {
        let mut e = vec![ConstantTag::Float as u8];
        e.extend_from_slice(&value.to_bits().to_be_bytes());
        self.push(e, 1)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        let mut e = vec![ConstantTag::Long as u8];
        e.extend_from_slice(&value.to_be_bytes());
        self.push(e, 2)
    }

    pub fn double(&mut self, value: f64) -> u16 {
        let mut e = vec![ConstantTag::Double as u8];
        e.extend_from_slice(&value.to_bits().to_be_bytes());
        self.push(e, 2)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let n = self.utf8(name);
        let d = self.utf8(descriptor);
        self.pair(ConstantTag::NameAndType, n, d)
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let c = self.class(class);
        let nt = self.name_and_type(name, descriptor);
        self.pair(ConstantTag::FieldRef, c, nt)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let c = self.class(class);
        let nt = self.name_and_type(name, descriptor);
        self.pair(ConstantTag::MethodRef, c, nt)
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let c = self.class(class);
        let nt = self.name_and_type(name, descriptor);
        self.pair(ConstantTag::InterfaceMethodRef, c, nt)
    }

    pub fn method_type(&mut self, descriptor: &str) -> u16 {
        let d = self.utf8(descriptor);
        let mut e = vec![ConstantTag::MethodType as u8];
        e.extend_from_slice(&d.to_be_bytes());
        self.push(e, 1)
    }

    pub fn method_handle(&mut self, kind: u8, reference: u16) -> u16 {
        let mut e = vec![ConstantTag::MethodHandle as u8, kind];
        e.extend_from_slice(&reference.to_be_bytes());
        self.push(e, 1)
    }

    pub fn invoke_dynamic(&mut self, bootstrap: u16, name: &str, descriptor: &str) -> u16 {
        let nt = self.name_and_type(name, descriptor);
        self.pair(ConstantTag::InvokeDynamic, bootstrap, nt)
    }

    pub fn access(&mut self, access: AccessFlags) -> &mut Self {
        self.access = access;
        self
    }

    pub fn version(&mut self, major: u16) -> &mut Self {
        self.major_version = major;
        self
    }

    pub fn super_class(&mut self, name: &str) -> &mut Self {
        self.super_class = self.class(name);
        self
    }

    pub fn interface(&mut self, name: &str) -> &mut Self {
        let idx = self.class(name);
        self.interfaces.push(idx);
        self
    }

    fn member(&mut self, access: AccessFlags, name: &str, descriptor: &str) -> Member {
        Member {
            access,
            name: self.utf8(name),
            descriptor: self.utf8(descriptor),
            attributes: vec![],
        }
    }

    pub fn field(&mut self, access: AccessFlags, name: &str, descriptor: &str) -> &mut Self {
        let m = self.member(access, name, descriptor);
        self.fields.push(m);
        self
    }

    /// Adds a static field, with a `ConstantValue` attribute when `constant`
    /// names a pool entry.
    pub fn static_field(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        constant: Option<u16>,
    ) -> &mut Self {
        let mut m = self.member(access | AccessFlags::STATIC, name, descriptor);
        if let Some(value) = constant {
            let attr = self.utf8("ConstantValue");
            m.attributes.push((attr, value.to_be_bytes().to_vec()));
        }
        self.fields.push(m);
        self
    }

    /// Adds a field carrying arbitrary raw attributes.
    pub fn raw_field(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        attributes: &[(&str, &[u8])],
    ) -> &mut Self {
        let mut m = self.member(access, name, descriptor);
        for (attr, data) in attributes {
            let a = self.utf8(attr);
            m.attributes.push((a, data.to_vec()));
        }
        self.fields.push(m);
        self
    }

    /// Adds a method. Concrete methods get a `Code` attribute holding a
    /// single `return`.
    pub fn method(&mut self, access: AccessFlags, name: &str, descriptor: &str) -> &mut Self {
        if access.is_native() || access.is_abstract() {
            let m = self.member(access, name, descriptor);
            self.methods.push(m);
            self
        } else {
            self.method_with_code(access, name, descriptor, &[RETURN])
        }
    }

    pub fn method_with_code(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        code: &[u8],
    ) -> &mut Self {
        let mut m = self.member(access, name, descriptor);
        let attr = self.utf8("Code");
        let mut data = vec![];
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(&(code.len() as u32).to_be_bytes());
        data.extend_from_slice(code);
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        m.attributes.push((attr, data));
        self.methods.push(m);
        self
    }

    /// Adds a static `<clinit>`.
    pub fn static_initializer(&mut self) -> &mut Self {
        self.method(AccessFlags::STATIC, "<clinit>", "()V")
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![];
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());
        out.extend_from_slice(&self.pool_count.to_be_bytes());
        out.extend_from_slice(&self.pool);
        out.extend_from_slice(&self.access.bits().to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for i in &self.interfaces {
            out.extend_from_slice(&i.to_be_bytes());
        }
        for members in [&self.fields, &self.methods] {
            out.extend_from_slice(&(members.len() as u16).to_be_bytes());
            for m in members {
                out.extend_from_slice(&m.access.bits().to_be_bytes());
                out.extend_from_slice(&m.name.to_be_bytes());
                out.extend_from_slice(&m.descriptor.to_be_bytes());
                out.extend_from_slice(&(m.attributes.len() as u16).to_be_bytes());
                for (name, data) in &m.attributes {
                    out.extend_from_slice(&name.to_be_bytes());
                    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
                    out.extend_from_slice(data);
                }
            }
        }
        // no class attributes
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }
}

fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::decode_modified_utf8;

    #[test]
    fn entries_are_deduplicated() {
        let mut b = ClassFileBuilder::new("T");
        let a = b.utf8("x");
        let c = b.utf8("x");
        assert_eq!(a, c);
        assert_eq!(b.class("T"), b.this_class);
    }

    #[test]
    fn modified_utf8_round_trips_through_the_decoder() {
        for s in ["plain", "\0", "\u{e9}t\u{e9}", "\u{1f600}"] {
            assert_eq!(decode_modified_utf8(&encode_modified_utf8(s)).as_deref(), Some(s));
        }
    }
}
