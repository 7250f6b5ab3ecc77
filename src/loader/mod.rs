//! Class loaders: per-namespace type registries and the delegation policy.
use crate::{
    classfile::{
        descriptor::MAX_ARRAY_DIMENSIONS, internal_class_name, FieldDescriptor, PrimitiveKind,
        ARRAY_MARKER, CLASS_END, CLASS_MARKER,
    },
    error::{Error, Result},
    names::{Name, NameTable},
    native::{self, NativeLibraries},
    precompiled,
    types::{members::NativeAddress, Type, TypeLink, TypeRef},
    vm::VmContext,
};
use dashmap::DashMap;
use std::{
    fmt::{Debug, Formatter},
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};
use tracing::{debug, trace};

pub mod classpath;

/// User loading hook of a non-bootstrap loader. Returns the type for `name`,
/// typically defined with [`ClassLoader::define_class`], or `None`.
pub trait DelegateLoader: Send + Sync {
    fn load_class(&self, loader: &ClassLoader, name: &Name) -> Result<Option<TypeRef>>;
}

/// Asks the bootstrap loader and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParentFirst;

impl DelegateLoader for ParentFirst {
    fn load_class(&self, loader: &ClassLoader, name: &Name) -> Result<Option<TypeRef>> {
        loader.bootstrap().load_class(name, false, false)
    }
}

pub struct ClassLoader {
    this: Weak<ClassLoader>,
    context: Arc<VmContext>,
    /// `None` for the bootstrap loader itself.
    bootstrap: Option<Arc<ClassLoader>>,
    delegate: Option<Arc<dyn DelegateLoader>>,
    classes: DashMap<Name, TypeRef>,
    primitives: Vec<TypeRef>,
    natives: NativeLibraries,
    native_names: DashMap<String, TypeLink>,
}

impl Debug for ClassLoader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassLoader")
            .field("bootstrap", &self.is_bootstrap())
            .field("classes", &self.classes.len())
            .field("natives", &self.natives)
            .finish()
    }
}

impl ClassLoader {
    pub(crate) fn new_bootstrap(context: Arc<VmContext>) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let primitives = PrimitiveKind::ALL
                .iter()
                .map(|kind| Type::new_primitive(this, context.names().intern(kind.keyword()), *kind))
                .collect();
            Self {
                this: this.clone(),
                context,
                bootstrap: None,
                delegate: None,
                classes: DashMap::new(),
                primitives,
                natives: NativeLibraries::new(),
                native_names: DashMap::new(),
            }
        })
    }

    pub(crate) fn new_child(bootstrap: &Arc<ClassLoader>, delegate: Arc<dyn DelegateLoader>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            context: bootstrap.context.clone(),
            bootstrap: Some(bootstrap.clone()),
            delegate: Some(delegate),
            classes: DashMap::new(),
            primitives: vec![],
            natives: NativeLibraries::new(),
            native_names: DashMap::new(),
        })
    }

    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap.is_none()
    }

    /// The root of this loader's hierarchy; the bootstrap loader returns itself.
    pub fn bootstrap(&self) -> &ClassLoader {
        self.bootstrap.as_deref().unwrap_or(self)
    }

    pub fn context(&self) -> &Arc<VmContext> {
        &self.context
    }

    pub fn names(&self) -> &NameTable {
        self.context.names()
    }

    pub fn self_ref(&self) -> Result<Arc<ClassLoader>> {
        self.this
            .upgrade()
            .ok_or_else(|| Error::internal("class loader is being torn down"))
    }

    /// This loader's own namespace only. Never loads.
    pub fn lookup(&self, name: &Name) -> Option<TypeRef> {
        self.classes.get(name).map(|t| t.value().clone())
    }

    /// Like [`ClassLoader::lookup`] for a name that may never have been interned.
    pub fn lookup_str(&self, name: &str) -> Option<TypeRef> {
        self.names().lookup(name).and_then(|n| self.lookup(&n))
    }

    /// Number of names bound in this namespace, linkage cache included.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn types(&self) -> Vec<TypeRef> {
        self.classes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn primitive(&self, kind: PrimitiveKind) -> Result<TypeRef> {
        self.bootstrap()
            .primitives
            .get(kind.index())
            .cloned()
            .ok_or_else(|| Error::internal(format!("no primitive type for {kind:?}")))
    }

    pub fn object_class(&self) -> Result<TypeRef> {
        let object = self.context.well_known().object.clone();
        self.bootstrap().load_or_throw(&object, false)
    }

    /// Binds `name` unless it is already bound; the existing binding wins.
    fn publish(&self, name: Name, ty: TypeRef) -> TypeRef {
        self.classes.entry(name).or_insert(ty).value().clone()
    }

    /// Looks `name` up, loading it if needed. Array names are synthesized
    /// from their component; other names come from the class path (bootstrap)
    /// or the delegate hook. Returns `None` on a miss unless `throw` is set.
    pub fn load_class(&self, name: &Name, resolve: bool, throw: bool) -> Result<Option<TypeRef>> {
        let found = match self.lookup(name) {
            Some(ty) => Some(ty),
            None => {
                let found = if name.first_char() == Some(ARRAY_MARKER) {
                    self.load_array(name)?
                } else if let Some(delegate) = &self.delegate {
                    delegate.load_class(self, name)?
                } else {
                    self.load_from_class_path(name)?
                };
                found.map(|ty| {
                    if ty.defined_by(self) {
                        ty
                    } else {
                        trace!("caching {} from another loader", name);
                        self.publish(name.clone(), ty)
                    }
                })
            }
        };

        match found {
            Some(ty) => {
                if resolve {
                    ty.resolve()?;
                }
                Ok(Some(ty))
            }
            None if throw => Err(Error::ClassNotFound(name.to_string())),
            None => Ok(None),
        }
    }

    pub fn load_or_throw(&self, name: &Name, resolve: bool) -> Result<TypeRef> {
        self.load_class(name, resolve, true)?
            .ok_or_else(|| Error::ClassNotFound(name.to_string()))
    }

    /// Loads a class named in source form, `a.b.C` or `[La.b.C;`.
    pub fn load_class_from_source_name(
        &self,
        text: &str,
        resolve: bool,
        throw: bool,
    ) -> Result<Option<TypeRef>> {
        let internal = internal_class_name(text)?;
        let name = self.names().intern(&internal);
        self.load_class(&name, resolve, throw)
    }

    /// The array name `depth` dimensions over the class `class`.
    pub fn construct_array_name(&self, depth: usize, class: &Name) -> Name {
        let mut text = String::with_capacity(depth + class.len() + 2);
        text.extend(std::iter::repeat(ARRAY_MARKER).take(depth));
        if class.first_char() == Some(ARRAY_MARKER) {
            text.push_str(class.as_str());
        } else {
            text.push(CLASS_MARKER);
            text.push_str(class.as_str());
            text.push(CLASS_END);
        }
        self.names().intern(&text)
    }

    /// Resolves a field descriptor to the type it names.
    pub fn type_for_descriptor(&self, descriptor: &str) -> Result<TypeRef> {
        match FieldDescriptor::parse(descriptor) {
            Some(FieldDescriptor::Primitive(kind)) => self.primitive(kind),
            Some(FieldDescriptor::Class(class)) => {
                self.load_or_throw(&self.names().intern(class), false)
            }
            Some(FieldDescriptor::Array(array)) => {
                self.load_or_throw(&self.names().intern(array), false)
            }
            None => Err(Error::IllegalName(descriptor.to_string())),
        }
    }

    fn load_array(&self, name: &Name) -> Result<Option<TypeRef>> {
        let Some(FieldDescriptor::Array(_)) = FieldDescriptor::parse(name.as_str()) else {
            return Ok(None);
        };
        let component = match FieldDescriptor::parse(&name.as_str()[1..]) {
            Some(FieldDescriptor::Primitive(kind)) => self.primitive(kind)?,
            Some(FieldDescriptor::Class(class)) => {
                match self.load_class(&self.names().intern(class), false, false)? {
                    Some(ty) => ty,
                    None => return Ok(None),
                }
            }
            Some(FieldDescriptor::Array(inner)) => {
                match self.load_class(&self.names().intern(inner), false, false)? {
                    Some(ty) => ty,
                    None => return Ok(None),
                }
            }
            None => return Ok(None),
        };
        component.array_type().map(Some)
    }

    /// Creates, or returns the existing, array of `component` in this loader.
    pub(crate) fn array_of(&self, component: &TypeRef) -> Result<TypeRef> {
        let text = format!("{ARRAY_MARKER}{}", component.descriptor());
        let dimensions = text.chars().take_while(|c| *c == ARRAY_MARKER).count();
        if dimensions > MAX_ARRAY_DIMENSIONS {
            return Err(Error::class_format(
                text,
                format!("more than {MAX_ARRAY_DIMENSIONS} array dimensions"),
            ));
        }
        let name = self.names().intern(&text);
        if let Some(existing) = self.lookup(&name) {
            return Ok(existing);
        }
        let array = Type::new_array(&self.this, name.clone(), component);
        let winner = self.publish(name, array);
        trace!("array type {}", winner.name());
        Ok(winner)
    }

    fn load_from_class_path(&self, name: &Name) -> Result<Option<TypeRef>> {
        match self.context.class_path().read(name.as_str())? {
            Some(bytes) => self.define_class(name, bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Defines `name` from `bytes` in this loader. The type is parsed before
    /// it is published; if `name` is already bound, the existing type is
    /// returned and `bytes` are discarded.
    pub fn define_class(&self, name: &Name, bytes: impl Into<Arc<[u8]>>) -> Result<TypeRef> {
        if let Some(existing) = self.lookup(name) {
            return Ok(existing);
        }
        if name.first_char() == Some(ARRAY_MARKER) {
            return Err(Error::IllegalName(name.to_string()));
        }
        let ty = Type::new_class(&self.this, name.clone(), bytes.into());
        ty.load()?;
        let winner = self.publish(name.clone(), ty);
        debug!("defined {}", winner.name());
        Ok(winner)
    }

    pub fn natives(&self) -> &NativeLibraries {
        &self.natives
    }

    pub fn load_library(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        self.natives.load(path)
    }

    /// Native symbol search: the running process, this loader's libraries,
    /// then the bootstrap loader's libraries.
    pub fn native_lookup(&self, symbol: &str) -> Option<NativeAddress> {
        native::process_symbol(symbol)
            .or_else(|| self.natives.lookup(symbol))
            .or_else(|| match &self.bootstrap {
                Some(b) => b.natives.lookup(symbol),
                None => None,
            })
    }

    pub(crate) fn register_native_name(&self, native: &str, ty: &Type) {
        if !self.native_names.contains_key(native) {
            self.native_names
                .entry(native.to_string())
                .or_insert_with(|| TypeLink::from_weak(ty.weak()));
        }
    }

    /// A type of this loader whose native name has been computed.
    pub fn type_for_native_name(&self, native: &str) -> Option<TypeRef> {
        self.native_names.get(native).and_then(|l| l.get().ok())
    }

    /// Defines every class of a precompiled unit in this loader.
    pub fn load_precompiled(&self, path: impl AsRef<Path>) -> Result<usize> {
        precompiled::load_precompiled(self, path.as_ref())
    }
}
