//! Runtime type descriptors and their load / resolve / initialise state machine.
//!
//! A [`Type`] is owned by the namespace map of its defining loader. Every
//! other reference between types (superclass, interfaces, array component,
//! constant pool caches, member back-pointers) is a non-owning [`TypeLink`].
use crate::{
    error::{Error, Result},
    loader::ClassLoader,
    names::Name,
    vtable::VirtualTable,
};
use enum_dispatch::enum_dispatch;
use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use std::{
    collections::VecDeque,
    fmt::{Debug, Formatter},
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, Weak,
    },
};
use tracing::debug;

pub mod array;
pub mod class;
pub mod members;
pub mod primitive;

pub use array::ArrayType;
pub use class::ClassType;
pub use members::{Field, FieldRef, HiddenField, Method, MethodRef};
pub use primitive::PrimitiveType;

pub type TypeRef = Arc<Type>;

/// Non-owning reference to a type held by its defining loader.
#[derive(Clone, Default)]
pub struct TypeLink(Weak<Type>);

impl TypeLink {
    pub fn new(ty: &TypeRef) -> Self {
        Self(Arc::downgrade(ty))
    }

    pub(crate) fn from_weak(weak: Weak<Type>) -> Self {
        Self(weak)
    }

    pub fn get(&self) -> Result<TypeRef> {
        self.0
            .upgrade()
            .ok_or_else(|| Error::internal("type released while still referenced"))
    }

    pub fn name(&self) -> Option<String> {
        self.0.upgrade().map(|t| t.name().to_string())
    }

    pub fn is(&self, ty: &Type) -> bool {
        std::ptr::eq(self.0.as_ptr(), ty)
    }
}

impl Debug for TypeLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.upgrade() {
            Some(t) => write!(f, "-> {}", t.name()),
            None => write!(f, "-> <released>"),
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeState {
    /// Named but not yet loaded.
    Cited = 0,
    /// Bytes attached and parsed.
    Loaded = 1,
    /// Supertypes resolved, layouts and virtual table built.
    Resolved = 2,
    /// Static storage allocated. Set before `<clinit>` runs.
    Inited = 3,
}

impl TypeState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Cited,
            1 => Self::Loaded,
            2 => Self::Resolved,
            _ => Self::Inited,
        }
    }
}

/// Per-variant steps of the state machine. [`Type`] owns the locking and
/// the state transitions; implementors only do the work of one step.
#[enum_dispatch]
pub trait TypeBehavior {
    /// Attaches and parses class bytes.
    fn attach(&self, ty: &Type) -> Result<()>;
    /// Resolves supertypes and builds layouts and the virtual table.
    fn link(&self, ty: &Type, hidden: &[HiddenField]) -> Result<()>;
    /// Allocates statics and applies constants.
    fn prepare(&self, ty: &Type) -> Result<()>;
    /// Initialises supertypes, then runs `<clinit>`. Called after the type
    /// is published as initialised.
    fn run_initializer(&self, ty: &Type) -> Result<()>;
    /// Field descriptor naming this type.
    fn descriptor(&self, ty: &Type) -> String;
    fn native_name(&self, ty: &Type) -> Result<String>;
}

#[enum_dispatch(TypeBehavior)]
pub enum TypeKind {
    PrimitiveType,
    ArrayType,
    ClassType,
}

pub struct Type {
    name: Name,
    loader: Weak<ClassLoader>,
    this: Weak<Type>,
    state: AtomicU8,
    lock: ReentrantMutex<()>,
    resolving: AtomicBool,
    init_done: AtomicBool,
    init_error: OnceCell<Error>,
    vtable: OnceCell<Arc<VirtualTable>>,
    native_name: OnceCell<String>,
    array: OnceCell<TypeLink>,
    kind: TypeKind,
}

impl Debug for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            TypeKind::PrimitiveType(_) => "primitive",
            TypeKind::ArrayType(_) => "array",
            TypeKind::ClassType(_) => "class",
        };
        write!(f, "{kind} {} ({:?})", self.name, self.state())
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Type {}

impl Type {
    fn with_kind(
        loader: &Weak<ClassLoader>,
        this: &Weak<Type>,
        name: Name,
        state: TypeState,
        kind: TypeKind,
    ) -> Self {
        Self {
            name,
            loader: loader.clone(),
            this: this.clone(),
            state: AtomicU8::new(state as u8),
            lock: ReentrantMutex::new(()),
            resolving: AtomicBool::new(false),
            init_done: AtomicBool::new(false),
            init_error: OnceCell::new(),
            vtable: OnceCell::new(),
            native_name: OnceCell::new(),
            array: OnceCell::new(),
            kind,
        }
    }

    pub(crate) fn new_class(loader: &Weak<ClassLoader>, name: Name, bytes: Arc<[u8]>) -> TypeRef {
        Arc::new_cyclic(|this| {
            Self::with_kind(loader, this, name, TypeState::Cited, ClassType::new(bytes).into())
        })
    }

    pub(crate) fn new_array(loader: &Weak<ClassLoader>, name: Name, component: &TypeRef) -> TypeRef {
        Arc::new_cyclic(|this| {
            Self::with_kind(
                loader,
                this,
                name,
                TypeState::Loaded,
                ArrayType::new(component).into(),
            )
        })
    }

    pub(crate) fn new_primitive(
        loader: &Weak<ClassLoader>,
        name: Name,
        kind: crate::classfile::PrimitiveKind,
    ) -> TypeRef {
        Arc::new_cyclic(|this| {
            let ty = Self::with_kind(
                loader,
                this,
                name,
                TypeState::Inited,
                PrimitiveType::new(kind).into(),
            );
            ty.init_done.store(true, Ordering::Release);
            let _ = ty.vtable.set(Arc::new(VirtualTable::empty()));
            ty
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn loader(&self) -> Result<Arc<ClassLoader>> {
        self.loader
            .upgrade()
            .ok_or_else(|| Error::internal(format!("loader of {} was torn down", self.name)))
    }

    /// Whether `loader` is the defining loader of this type.
    pub fn defined_by(&self, loader: &ClassLoader) -> bool {
        std::ptr::eq(self.loader.as_ptr(), loader)
    }

    pub fn self_ref(&self) -> Result<TypeRef> {
        self.this
            .upgrade()
            .ok_or_else(|| Error::internal(format!("{} is being dropped", self.name)))
    }

    pub(crate) fn weak(&self) -> Weak<Type> {
        self.this.clone()
    }

    pub fn state(&self) -> TypeState {
        TypeState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn advance(&self, state: TypeState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    pub fn is_class(&self) -> bool {
        matches!(self.kind, TypeKind::ClassType(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::ArrayType(_))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, TypeKind::PrimitiveType(_))
    }

    pub fn is_interface(&self) -> bool {
        self.as_class().map(|c| c.is_interface()).unwrap_or(false)
    }

    pub fn as_class(&self) -> Result<&ClassType> {
        match &self.kind {
            TypeKind::ClassType(c) => Ok(c),
            _ => Err(self.wrong_kind("a class")),
        }
    }

    pub fn as_array(&self) -> Result<&ArrayType> {
        match &self.kind {
            TypeKind::ArrayType(a) => Ok(a),
            _ => Err(self.wrong_kind("an array")),
        }
    }

    pub fn as_primitive(&self) -> Result<&PrimitiveType> {
        match &self.kind {
            TypeKind::PrimitiveType(p) => Ok(p),
            _ => Err(self.wrong_kind("a primitive")),
        }
    }

    fn wrong_kind(&self, expected: &str) -> Error {
        Error::internal(format!("{} is not {expected} type", self.name))
    }

    /// Parses the class bytes. No-op once loaded.
    pub fn load(&self) -> Result<()> {
        if self.state() >= TypeState::Loaded {
            return Ok(());
        }
        let _guard = self.lock.lock();
        if self.state() >= TypeState::Loaded {
            return Ok(());
        }
        self.kind.attach(self)?;
        self.advance(TypeState::Loaded);
        debug!("loaded {}", self.name);
        Ok(())
    }

    pub fn resolve(&self) -> Result<()> {
        self.resolve_with_hidden_fields(&[])
    }

    /// Resolves the type, adding `hidden` fields ahead of the declared ones.
    /// Hidden fields can only be added by the call that does the resolving.
    pub fn resolve_with_hidden_fields(&self, hidden: &[HiddenField]) -> Result<()> {
        if self.state() >= TypeState::Resolved {
            return self.check_no_hidden(hidden);
        }
        self.load()?;

        let _guard = self.lock.lock();
        if self.state() >= TypeState::Resolved {
            return self.check_no_hidden(hidden);
        }
        if self.resolving.swap(true, Ordering::AcqRel) {
            return Err(Error::ClassCircularity(self.name.to_string()));
        }
        let linked = self.kind.link(self, hidden);
        self.resolving.store(false, Ordering::Release);
        linked?;

        self.advance(TypeState::Resolved);
        debug!("resolved {}", self.name);
        Ok(())
    }

    fn check_no_hidden(&self, hidden: &[HiddenField]) -> Result<()> {
        if hidden.is_empty() {
            Ok(())
        } else {
            Err(Error::IllegalState(format!(
                "cannot add hidden fields to {}: already resolved",
                self.name
            )))
        }
    }

    /// Runs static initialisation at most once. Statics are allocated and the
    /// state becomes [`TypeState::Inited`] before supertypes are initialised
    /// and `<clinit>` runs, so the initializing thread can re-enter freely
    /// while other threads wait on the lock.
    pub fn initialise(&self) -> Result<()> {
        if self.init_done.load(Ordering::Acquire) {
            return self.init_outcome();
        }
        self.resolve()?;

        let _guard = self.lock.lock();
        if self.init_error.get().is_some() {
            return self.init_outcome();
        }
        if self.state() >= TypeState::Inited {
            return Ok(());
        }

        debug!("initialising {}", self.name);
        let outcome = self.kind.prepare(self).and_then(|_| {
            self.advance(TypeState::Inited);
            self.kind.run_initializer(self)
        });
        if let Err(e) = &outcome {
            debug!("initialisation of {} failed: {e}", self.name);
            let _ = self.init_error.set(e.clone());
        }
        self.init_done.store(true, Ordering::Release);
        outcome
    }

    fn init_outcome(&self) -> Result<()> {
        match self.init_error.get() {
            Some(_) => Err(Error::InitializationFailed(self.name.to_string())),
            None => Ok(()),
        }
    }

    /// The error that poisoned this type's initialisation, if any.
    pub fn initialization_error(&self) -> Option<&Error> {
        self.init_error.get()
    }

    pub fn descriptor(&self) -> String {
        self.kind.descriptor(self)
    }

    /// Mangled native name, computed once and registered with the defining
    /// loader so the type can be found by it.
    pub fn native_name(&self) -> Result<&str> {
        let name = self.native_name.get_or_try_init(|| self.kind.native_name(self))?;
        self.loader()?.register_native_name(name, self);
        Ok(name.as_str())
    }

    pub fn vtable(&self) -> Result<Arc<VirtualTable>> {
        self.vtable.get().cloned().ok_or_else(|| {
            Error::IllegalState(format!("{} has no virtual table before resolution", self.name))
        })
    }

    pub(crate) fn set_vtable(&self, vtable: Arc<VirtualTable>) {
        let _ = self.vtable.set(vtable);
    }

    /// The one-dimensional array of this type, created on first request in
    /// this type's defining loader.
    pub fn array_type(&self) -> Result<TypeRef> {
        if let Some(link) = self.array.get() {
            return link.get();
        }
        if let TypeKind::PrimitiveType(p) = &self.kind {
            if p.kind() == crate::classfile::PrimitiveKind::Void {
                return Err(Error::IllegalState("arrays of void do not exist".into()));
            }
        }
        let me = self.self_ref()?;
        let array = self.loader()?.array_of(&me)?;
        let _ = self.array.set(TypeLink::new(&array));
        Ok(array)
    }

    /// The array type `depth` dimensions above this one. Depth zero is the
    /// type itself.
    pub fn get_array(&self, depth: usize) -> Result<TypeRef> {
        let mut ty = self.self_ref()?;
        for _ in 0..depth {
            ty = ty.array_type()?;
        }
        Ok(ty)
    }

    pub fn component_type(&self) -> Result<TypeRef> {
        self.as_array()?.component()
    }

    /// Direct superclass. The root class is its own superclass; arrays
    /// report the root class and primitives have none.
    pub fn super_class(&self) -> Result<Option<TypeRef>> {
        match &self.kind {
            TypeKind::PrimitiveType(_) => Ok(None),
            TypeKind::ArrayType(_) => self.loader()?.object_class().map(Some),
            TypeKind::ClassType(c) => c.super_class().map(Some),
        }
    }

    /// Like [`Type::super_class`] but `None` at the top of the hierarchy.
    pub fn parent(&self) -> Result<Option<TypeRef>> {
        Ok(self
            .super_class()?
            .filter(|s| !std::ptr::eq(s.as_ref(), self)))
    }

    pub fn interfaces(&self) -> Result<Vec<TypeRef>> {
        match &self.kind {
            TypeKind::ClassType(c) => c.interfaces(),
            _ => Ok(vec![]),
        }
    }

    /// This type and its superclasses, most derived first.
    pub fn ancestors(&self) -> Result<Vec<TypeRef>> {
        let mut chain = vec![self.self_ref()?];
        while let Some(p) = chain[chain.len() - 1].parent()? {
            chain.push(p);
        }
        Ok(chain)
    }

    /// Every interface this type implements, directly or through supertypes.
    pub fn all_interfaces(&self) -> Result<Vec<TypeRef>> {
        let mut seen: Vec<TypeRef> = vec![];
        let mut queue: VecDeque<TypeRef> = VecDeque::new();
        for a in self.ancestors()? {
            queue.extend(a.interfaces()?);
        }
        while let Some(i) = queue.pop_front() {
            if seen.iter().any(|s| Arc::ptr_eq(s, &i)) {
                continue;
            }
            queue.extend(i.interfaces()?);
            seen.push(i);
        }
        Ok(seen)
    }

    /// Whether a value of this type may be stored where `other` is expected.
    pub fn is_assignable_to(&self, other: &Type) -> Result<bool> {
        if self == other {
            return Ok(true);
        }
        if self.is_primitive() || other.is_primitive() {
            return Ok(false);
        }
        self.resolve()?;
        other.resolve()?;

        let well_known = self.loader()?.context().well_known().clone();
        if other.is_class() && *other.name() == well_known.object {
            return Ok(true);
        }

        match (&self.kind, &other.kind) {
            (TypeKind::ArrayType(a), TypeKind::ArrayType(b)) => {
                let (ac, bc) = (a.component()?, b.component()?);
                if ac.is_primitive() || bc.is_primitive() {
                    Ok(Arc::ptr_eq(&ac, &bc))
                } else {
                    ac.is_assignable_to(&bc)
                }
            }
            (TypeKind::ArrayType(_), TypeKind::ClassType(_)) => {
                Ok(*other.name() == well_known.cloneable || *other.name() == well_known.serializable)
            }
            (TypeKind::ClassType(_), TypeKind::ClassType(oc)) => {
                if oc.is_interface() {
                    Ok(self.all_interfaces()?.iter().any(|i| i.as_ref() == other))
                } else {
                    Ok(self.ancestors()?.iter().any(|a| a.as_ref() == other))
                }
            }
            _ => Ok(false),
        }
    }

    /// Binds a native method declared by this class to an explicit address.
    pub fn register_native(
        &self,
        name: &str,
        signature: &str,
        address: members::NativeAddress,
    ) -> Result<()> {
        self.load()?;
        let loader = self.loader()?;
        let names = loader.names();
        let method = names
            .lookup(name)
            .zip(names.lookup(signature))
            .and_then(|(n, s)| self.as_class().ok()?.declared_method(&n, &s).cloned());
        match method {
            Some(m) => m.register_native(address),
            None => Err(Error::NoSuchMethod {
                class: self.name.to_string(),
                name: name.to_string(),
                signature: signature.to_string(),
            }),
        }
    }

    pub fn find_static_method(&self, name: &Name, signature: &Name) -> Result<MethodRef> {
        self.resolve()?;
        let found = match &self.kind {
            TypeKind::ClassType(c) => c.declared_method(name, signature),
            _ => None,
        };
        match found {
            Some(m) if m.is_static() => Ok(m.clone()),
            Some(m) => Err(incompatible("method", self, m.name(), true)),
            None => Err(self.no_such_method(name, signature)),
        }
    }

    /// Finds an instance method declared here or inherited from a superclass.
    pub fn find_virtual_method(&self, name: &Name, signature: &Name) -> Result<MethodRef> {
        self.resolve()?;
        match &self.kind {
            TypeKind::PrimitiveType(_) => return Err(self.no_such_method(name, signature)),
            TypeKind::ArrayType(_) => {
                return self.loader()?.object_class()?.find_virtual_method(name, signature)
            }
            TypeKind::ClassType(_) => {}
        }

        for ancestor in self.ancestors()? {
            if let Some(m) = ancestor.as_class()?.declared_method(name, signature) {
                if m.is_static() {
                    return Err(incompatible("method", self, m.name(), false));
                }
                return Ok(m.clone());
            }
        }
        // Abstract classes inherit methods they do not implement yet.
        for interface in self.all_interfaces()? {
            if let Some(m) = interface.as_class()?.declared_method(name, signature) {
                if !m.is_static() {
                    return Ok(m.clone());
                }
            }
        }
        Err(self.no_such_method(name, signature))
    }

    /// Interface method resolution: own methods, then the superclass chain,
    /// then superinterfaces breadth-first.
    pub fn find_interface_method(&self, name: &Name, signature: &Name) -> Result<MethodRef> {
        self.resolve()?;
        if !self.is_class() {
            return Err(self.no_such_method(name, signature));
        }
        for ancestor in self.ancestors()? {
            if let Some(m) = ancestor.as_class()?.declared_method(name, signature) {
                return Ok(m.clone());
            }
        }
        for interface in self.all_interfaces()? {
            if let Some(m) = interface.as_class()?.declared_method(name, signature) {
                return Ok(m.clone());
            }
        }
        Err(self.no_such_method(name, signature))
    }

    pub fn find_static_field(&self, name: &Name, descriptor: &Name) -> Result<FieldRef> {
        self.resolve()?;
        let found = match &self.kind {
            TypeKind::ClassType(c) => c.declared_field(name, descriptor),
            _ => None,
        };
        match found {
            Some(f) if f.is_static() => Ok(f.clone()),
            Some(f) => Err(incompatible("field", self, f.name(), true)),
            None => Err(self.no_such_field(name, descriptor)),
        }
    }

    /// Finds an instance field declared here or in a superclass.
    pub fn find_virtual_field(&self, name: &Name, descriptor: &Name) -> Result<FieldRef> {
        self.resolve()?;
        if !self.is_class() {
            return Err(self.no_such_field(name, descriptor));
        }
        for ancestor in self.ancestors()? {
            if let Some(f) = ancestor.as_class()?.declared_field(name, descriptor) {
                if f.is_static() {
                    return Err(incompatible("field", self, f.name(), false));
                }
                return Ok(f.clone());
            }
        }
        Err(self.no_such_field(name, descriptor))
    }

    fn no_such_method(&self, name: &Name, signature: &Name) -> Error {
        Error::NoSuchMethod {
            class: self.name.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
        }
    }

    fn no_such_field(&self, name: &Name, descriptor: &Name) -> Error {
        Error::NoSuchField {
            class: self.name.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

fn incompatible(what: &str, ty: &Type, member: &Name, expected_static: bool) -> Error {
    let (expected, actual) = if expected_static {
        ("static", "instance")
    } else {
        ("instance", "static")
    };
    Error::IncompatibleUse(format!(
        "{what} {}.{member} is {actual}, not {expected}",
        ty.name()
    ))
}
