use crate::{
    error::Result,
    types::members::{FieldRef, MethodRef},
};
use std::{cmp::Reverse, mem::size_of};
use tracing::trace;

/// Object header every instance starts with: type pointer and lock word.
pub const OBJECT_HEADER_SIZE: usize = 2 * size_of::<usize>();
/// Type-identity header at the start of every static storage block.
pub const STATIC_HEADER_SIZE: usize = size_of::<usize>();

pub const fn align_up(value: usize, align: usize) -> usize {
    let misalignment = value % align;
    if misalignment == 0 {
        value
    } else {
        value + align - misalignment
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    Static,
    Instance,
}

/// Packed arrangement of one class's static or instance members.
#[derive(Debug)]
pub struct Layout {
    kind: LayoutKind,
    fields: Vec<FieldRef>,
    methods: Vec<MethodRef>,
    base: usize,
    size: usize,
    alignment: usize,
}

impl Layout {
    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    /// Fields in declaration order, hidden fields first.
    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodRef] {
        &self.methods
    }

    /// Offset of the first byte this layout owns. Everything before it is
    /// the header or, for instances, the superclass layout.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn field(&self, name: &str) -> Option<&FieldRef> {
        self.fields.iter().find(|f| f.name().as_str() == name)
    }
}

pub struct LayoutFactory;

impl LayoutFactory {
    /// Lays out `fields` after `base` bytes, widest first. Fields of equal
    /// width keep their declaration order.
    pub fn create(
        kind: LayoutKind,
        owner: &str,
        base: usize,
        base_alignment: usize,
        fields: Vec<FieldRef>,
        methods: Vec<MethodRef>,
    ) -> Result<Layout> {
        let mut widths = Vec::with_capacity(fields.len());
        for f in &fields {
            widths.push(f.width()?);
        }

        let mut order: Vec<usize> = (0..fields.len()).collect();
        order.sort_by_key(|&i| Reverse(widths[i]));

        let mut cursor = base;
        let mut alignment = base_alignment.max(1);
        for i in order {
            let width = widths[i];
            let offset = align_up(cursor, width);
            fields[i].assign_offset(offset)?;
            trace!("{owner} {kind:?} field {} at {offset} ({width} bytes)", fields[i].name());
            cursor = offset + width;
            alignment = alignment.max(width);
        }

        let size = align_up(cursor, alignment);
        trace!("{owner} {kind:?} layout: {} fields, {size} bytes", fields.len());
        Ok(Layout {
            kind,
            fields,
            methods,
            base,
            size,
            alignment,
        })
    }

    pub fn instance(
        owner: &str,
        parent: Option<&Layout>,
        fields: Vec<FieldRef>,
        methods: Vec<MethodRef>,
    ) -> Result<Layout> {
        let (base, alignment) = match parent {
            Some(p) => (p.size(), p.alignment()),
            None => (OBJECT_HEADER_SIZE, size_of::<usize>()),
        };
        Self::create(LayoutKind::Instance, owner, base, alignment, fields, methods)
    }

    pub fn statics(owner: &str, fields: Vec<FieldRef>, methods: Vec<MethodRef>) -> Result<Layout> {
        Self::create(
            LayoutKind::Static,
            owner,
            STATIC_HEADER_SIZE,
            size_of::<usize>(),
            fields,
            methods,
        )
    }
}
