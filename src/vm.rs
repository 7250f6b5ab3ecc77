//! Process-scoped context: the shared name table, well-known names, the
//! bootstrap loader and the external collaborators every loader talks to.
use crate::{
    error::Result,
    layout::Layout,
    loader::{
        classpath::{ArchiveSource, ClassPath, ClassSource, DirectorySource},
        ClassLoader, DelegateLoader, ParentFirst,
    },
    names::{Name, NameTable},
    precompiled,
    storage::{FieldStorage, ObjectRef},
    types::{MethodRef, TypeRef},
};
use dashmap::DashMap;
use std::{
    fmt::{Debug, Formatter},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

/// Provides memory for static storage and string constants.
pub trait Allocator: Send + Sync {
    /// Allocates zeroed storage for a static layout. Called once per class.
    fn allocate(&self, owner: &Name, layout: &Layout, size: usize) -> Result<Arc<FieldStorage>>;

    /// Returns the string object for a constant-pool string.
    fn string(&self, value: &Name) -> Result<ObjectRef>;
}

/// In-process allocator. String objects are interned handles.
#[derive(Default)]
pub struct HeapAllocator {
    strings: DashMap<Name, ObjectRef>,
    values: DashMap<ObjectRef, Name>,
    next: AtomicUsize,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The text of a string object this allocator handed out.
    pub fn string_value(&self, object: ObjectRef) -> Option<Name> {
        self.values.get(&object).map(|v| v.value().clone())
    }
}

impl Allocator for HeapAllocator {
    fn allocate(&self, owner: &Name, layout: &Layout, size: usize) -> Result<Arc<FieldStorage>> {
        trace!("allocating {size} bytes of statics for {owner} ({} fields)", layout.fields().len());
        Ok(Arc::new(FieldStorage::new(owner.as_str(), size)))
    }

    fn string(&self, value: &Name) -> Result<ObjectRef> {
        let object = *self
            .strings
            .entry(value.clone())
            .or_insert_with(|| ObjectRef(self.next.fetch_add(1, Ordering::Relaxed) + 1))
            .value();
        self.values.entry(object).or_insert_with(|| value.clone());
        Ok(object)
    }
}

/// Executes bytecode on behalf of the loading core.
pub trait Interpreter: Send + Sync {
    /// Runs a static method; used for `<clinit>`.
    fn invoke_static(&self, method: &MethodRef) -> Result<()>;
}

/// Default interpreter: records the request and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInterpreter;

impl Interpreter for NoInterpreter {
    fn invoke_static(&self, method: &MethodRef) -> Result<()> {
        trace!("no interpreter attached, skipping {method:?}");
        Ok(())
    }
}

/// Names the core compares against, interned once.
#[derive(Clone, Debug)]
pub struct WellKnownNames {
    pub object: Name,
    pub string: Name,
    pub cloneable: Name,
    pub serializable: Name,
    pub clinit: Name,
    pub init: Name,
    pub void_signature: Name,
    pub constant_value: Name,
    pub code: Name,
}

impl WellKnownNames {
    pub const OBJECT: &'static str = "java/lang/Object";

    fn new(names: &NameTable) -> Self {
        Self {
            object: names.intern(Self::OBJECT),
            string: names.intern("java/lang/String"),
            cloneable: names.intern("java/lang/Cloneable"),
            serializable: names.intern("java/io/Serializable"),
            clinit: names.intern("<clinit>"),
            init: names.intern("<init>"),
            void_signature: names.intern("()V"),
            constant_value: names.intern("ConstantValue"),
            code: names.intern("Code"),
        }
    }
}

/// State shared by every loader of one VM.
pub struct VmContext {
    names: NameTable,
    well_known: WellKnownNames,
    class_path: ClassPath,
    allocator: Arc<dyn Allocator>,
    interpreter: Arc<dyn Interpreter>,
}

impl Debug for VmContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmContext")
            .field("names", &self.names)
            .field("class_path", &self.class_path)
            .finish()
    }
}

impl VmContext {
    pub fn names(&self) -> &NameTable {
        &self.names
    }

    pub fn well_known(&self) -> &WellKnownNames {
        &self.well_known
    }

    pub fn class_path(&self) -> &ClassPath {
        &self.class_path
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    pub fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.interpreter
    }
}

pub struct Vm {
    context: Arc<VmContext>,
    bootstrap: Arc<ClassLoader>,
}

impl Debug for Vm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm").field("context", &self.context).finish()
    }
}

impl Vm {
    pub fn builder() -> VmBuilder {
        VmBuilder::default()
    }

    pub fn context(&self) -> &Arc<VmContext> {
        &self.context
    }

    pub fn names(&self) -> &NameTable {
        self.context.names()
    }

    pub fn bootstrap(&self) -> &Arc<ClassLoader> {
        &self.bootstrap
    }

    /// A new loader whose unknown names go to `delegate`, defaulting to the
    /// bootstrap loader.
    pub fn new_loader(&self, delegate: Option<Arc<dyn DelegateLoader>>) -> Arc<ClassLoader> {
        let delegate = delegate.unwrap_or_else(|| Arc::new(ParentFirst));
        ClassLoader::new_child(&self.bootstrap, delegate)
    }

    pub fn object_class(&self) -> Result<TypeRef> {
        self.bootstrap.object_class()
    }

    /// Loads a class by internal name through the bootstrap loader.
    pub fn load(&self, name: &str, resolve: bool) -> Result<TypeRef> {
        let name = self.names().intern(name);
        self.bootstrap.load_or_throw(&name, resolve)
    }
}

/// Builds a [`Vm`]: search path, collaborators and precompiled units.
#[derive(Default)]
pub struct VmBuilder {
    class_path: ClassPath,
    allocator: Option<Arc<dyn Allocator>>,
    interpreter: Option<Arc<dyn Interpreter>>,
    precompiled: Vec<PathBuf>,
}

impl VmBuilder {
    /// Appends every entry of a platform-separated class path string.
    pub fn class_path(mut self, text: &str) -> Result<Self> {
        for entry in std::env::split_paths(text) {
            if !entry.as_os_str().is_empty() {
                self.class_path.add_entry(&entry)?;
            }
        }
        Ok(self)
    }

    pub fn directory(mut self, root: impl Into<PathBuf>) -> Self {
        self.class_path.push(Arc::new(DirectorySource::new(root)));
        self
    }

    pub fn archive(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        self.class_path.push(Arc::new(ArchiveSource::open(path)?));
        Ok(self)
    }

    pub fn source(mut self, source: Arc<dyn ClassSource>) -> Self {
        self.class_path.push(source);
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// A precompiled unit whose classes are defined in the bootstrap loader
    /// when the VM is built.
    pub fn precompiled(mut self, path: impl Into<PathBuf>) -> Self {
        self.precompiled.push(path.into());
        self
    }

    pub fn build(self) -> Result<Vm> {
        let names = NameTable::new();
        let well_known = WellKnownNames::new(&names);
        let context = Arc::new(VmContext {
            names,
            well_known,
            class_path: self.class_path,
            allocator: self
                .allocator
                .unwrap_or_else(|| Arc::new(HeapAllocator::new())),
            interpreter: self.interpreter.unwrap_or_else(|| Arc::new(NoInterpreter)),
        });
        let bootstrap = ClassLoader::new_bootstrap(context.clone());
        for unit in &self.precompiled {
            let count = precompiled::load_precompiled(&bootstrap, unit)?;
            debug!("defined {count} precompiled classes from {}", unit.display());
        }
        debug!(
            "vm ready: {} class path entries",
            context.class_path().len()
        );
        Ok(Vm { context, bootstrap })
    }
}
