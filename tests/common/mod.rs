#![allow(dead_code)]

use jvm_loader::{
    classfile::{builder::ClassFileBuilder, AccessFlags},
    loader::classpath::MemorySource,
    vm::{Allocator, Interpreter},
    MethodRef, Name, Result, Vm,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub const OBJECT: &str = "java/lang/Object";

/// A root class with a constructor and two overridable methods.
pub fn object_class() -> Vec<u8> {
    ClassFileBuilder::new(OBJECT)
        .method(AccessFlags::PUBLIC, "<init>", "()V")
        .method(AccessFlags::PUBLIC, "hashCode", "()I")
        .method(AccessFlags::PUBLIC, "toString", "()Ljava/lang/String;")
        .build()
}

/// A builder for `name` already extending `parent`.
pub fn class(name: &str, parent: &str) -> ClassFileBuilder {
    let mut b = ClassFileBuilder::new(name);
    b.super_class(parent);
    b
}

pub fn interface(name: &str) -> ClassFileBuilder {
    let mut b = class(name, OBJECT);
    b.access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT);
    b
}

type Hook = Box<dyn Fn(&MethodRef) -> Result<()> + Send + Sync>;

/// Records every `<clinit>` it is asked to run, in order, then runs an
/// optional hook.
#[derive(Default)]
pub struct RecordingInterpreter {
    calls: Mutex<Vec<String>>,
    hook: Option<Hook>,
}

impl RecordingInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(hook: impl Fn(&MethodRef) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(vec![]),
            hook: Some(Box::new(hook)),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, class: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == class).count()
    }
}

impl Interpreter for RecordingInterpreter {
    fn invoke_static(&self, method: &MethodRef) -> Result<()> {
        let owner = method.declaring_type()?.name().to_string();
        self.calls.lock().push(owner);
        match &self.hook {
            Some(hook) => hook(method),
            None => Ok(()),
        }
    }
}

/// A VM under construction whose bootstrap class path is one in-memory
/// source that already holds the root class.
pub struct TestVm {
    pub source: Arc<MemorySource>,
    interpreter: Option<Arc<dyn Interpreter>>,
    allocator: Option<Arc<dyn Allocator>>,
}

impl TestVm {
    pub fn new() -> Self {
        let source = Arc::new(MemorySource::new());
        source.insert(OBJECT, object_class());
        Self {
            source,
            interpreter: None,
            allocator: None,
        }
    }

    pub fn class(self, name: &str, bytes: Vec<u8>) -> Self {
        self.source.insert(name, bytes);
        self
    }

    pub fn interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn build(self) -> Vm {
        let mut builder = Vm::builder().source(self.source);
        if let Some(i) = self.interpreter {
            builder = builder.interpreter(i);
        }
        if let Some(a) = self.allocator {
            builder = builder.allocator(a);
        }
        builder.build().unwrap()
    }
}

pub fn name(vm: &Vm, text: &str) -> Name {
    vm.names().intern(text)
}
