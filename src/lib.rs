//! Class loading and type resolution for a JVM-style virtual machine.
//!
//! A [`Vm`] owns the shared name table and the bootstrap [`ClassLoader`].
//! Loaders turn class bytes into [`Type`]s that move through
//! cited, loaded, resolved and initialised states on demand.
pub mod classfile;
pub mod error;
pub mod layout;
pub mod loader;
pub mod mangle;
pub mod names;
pub mod native;
pub mod precompiled;
pub mod storage;
pub mod types;
pub mod vm;
pub mod vtable;

pub use error::{Error, Result};
pub use loader::{ClassLoader, DelegateLoader, ParentFirst};
pub use names::{Name, NameTable};
pub use types::{Field, FieldRef, HiddenField, Method, MethodRef, Type, TypeRef, TypeState};
pub use vm::{Vm, VmBuilder};
