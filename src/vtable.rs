use crate::{names::Name, types::members::MethodRef};
use tracing::trace;

/// Dispatch slots of one class. A subclass table starts as a copy of its
/// parent's, so inherited slot numbers never move.
#[derive(Debug, Default)]
pub struct VirtualTable {
    slots: Vec<MethodRef>,
}

impl VirtualTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn build(owner: &str, parent: Option<&VirtualTable>, declared: &[MethodRef]) -> Self {
        let mut slots = parent.map(|p| p.slots.clone()).unwrap_or_default();

        for method in declared.iter().filter(|m| m.is_virtual()) {
            let existing = slots.iter().position(|m| {
                m.name() == method.name() && m.signature() == method.signature()
            });
            let slot = match existing {
                Some(slot) => {
                    trace!("{owner}: {}{} overrides slot {slot}", method.name(), method.signature());
                    slots[slot] = method.clone();
                    slot
                }
                None => {
                    slots.push(method.clone());
                    trace!(
                        "{owner}: {}{} takes slot {}",
                        method.name(),
                        method.signature(),
                        slots.len() - 1
                    );
                    slots.len() - 1
                }
            };
            method.assign_slot(slot);
        }

        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&MethodRef> {
        self.slots.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodRef> {
        self.slots.iter()
    }

    pub fn find(&self, name: &Name, signature: &Name) -> Option<&MethodRef> {
        self.slots
            .iter()
            .find(|m| m.name() == name && m.signature() == signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classfile::AccessFlags,
        names::NameTable,
        types::{
            members::{Attributes, Method},
            TypeLink,
        },
    };
    use std::sync::Arc;

    fn method(names: &NameTable, name: &str, sig: &str, access: AccessFlags) -> MethodRef {
        Arc::new(Method::new(
            names.intern(name),
            names.intern(sig),
            access,
            TypeLink::default(),
            Attributes::default(),
            name.starts_with('<'),
        ))
    }

    #[test]
    fn overrides_reuse_parent_slots() {
        let names = NameTable::new();
        let a_foo = method(&names, "foo", "()V", AccessFlags::PUBLIC);
        let a_bar = method(&names, "bar", "(I)I", AccessFlags::PUBLIC);
        let parent = VirtualTable::build("A", None, &[a_foo.clone(), a_bar.clone()]);
        assert_eq!(parent.len(), 2);

        let b_bar = method(&names, "bar", "(I)I", AccessFlags::PUBLIC);
        let b_baz = method(&names, "baz", "()V", AccessFlags::PUBLIC);
        let child = VirtualTable::build("B", Some(&parent), &[b_bar.clone(), b_baz.clone()]);

        assert_eq!(child.len(), 3);
        assert!(Arc::ptr_eq(child.get(0).unwrap(), &a_foo));
        assert!(Arc::ptr_eq(child.get(1).unwrap(), &b_bar));
        assert_eq!(b_bar.slot(), a_bar.slot());
        assert_eq!(b_baz.slot(), Some(2));
        // Parent table is untouched.
        assert!(Arc::ptr_eq(parent.get(1).unwrap(), &a_bar));
    }

    #[test]
    fn overloads_get_their_own_slot() {
        let names = NameTable::new();
        let parent = VirtualTable::build(
            "A",
            None,
            &[method(&names, "foo", "()V", AccessFlags::PUBLIC)],
        );
        let child = VirtualTable::build(
            "B",
            Some(&parent),
            &[method(&names, "foo", "(I)V", AccessFlags::PUBLIC)],
        );
        assert_eq!(child.len(), 2);
    }

    #[test]
    fn static_private_and_initializers_are_excluded() {
        let names = NameTable::new();
        let table = VirtualTable::build(
            "A",
            None,
            &[
                method(&names, "<clinit>", "()V", AccessFlags::STATIC),
                method(&names, "<init>", "()V", AccessFlags::PUBLIC),
                method(&names, "helper", "()V", AccessFlags::PRIVATE),
                method(&names, "util", "()V", AccessFlags::STATIC | AccessFlags::PUBLIC),
                method(&names, "run", "()V", AccessFlags::PUBLIC),
            ],
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().name().as_str(), "run");
    }
}
