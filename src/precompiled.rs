//! Precompiled units: shared objects that carry class bytes for a loader.
//!
//! A unit exports [`PRECOMPILED_SYMBOL`], a function returning a
//! [`PrecompiledTable`]. Every entry is defined into the target loader when
//! the unit is loaded, so those names never reach the class path.
use crate::{
    error::{Error, Result},
    loader::ClassLoader,
};
use std::{path::Path, slice};
use tracing::{debug, trace};

pub const PRECOMPILED_SYMBOL: &str = "jvm_precompiled_classes";

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PrecompiledClass {
    /// Internal class name, UTF-8, not NUL-terminated.
    pub name: *const u8,
    pub name_len: usize,
    pub bytes: *const u8,
    pub bytes_len: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PrecompiledTable {
    pub classes: *const PrecompiledClass,
    pub len: usize,
}

pub type PrecompiledEntry = unsafe extern "C" fn() -> *const PrecompiledTable;

/// Opens the unit at `path` in `loader`'s native libraries and defines every
/// class it carries. Returns the number of classes defined.
pub fn load_precompiled(loader: &ClassLoader, path: &Path) -> Result<usize> {
    let natives = loader.natives();
    let opened = natives.load(path)?;
    let address = natives.symbol_in(&opened, PRECOMPILED_SYMBOL).ok_or_else(|| {
        Error::UnsatisfiedLink(format!(
            "{} does not export {PRECOMPILED_SYMBOL}",
            opened.display()
        ))
    })?;

    // SAFETY: the exported symbol is a `PrecompiledEntry` by contract, and the
    // library stays open for as long as the loader owns it.
    let table = unsafe {
        let entry: PrecompiledEntry = std::mem::transmute(address);
        entry()
    };
    if table.is_null() {
        return Err(Error::UnsatisfiedLink(format!(
            "{PRECOMPILED_SYMBOL} in {} returned no table",
            opened.display()
        )));
    }

    // SAFETY: checked non-null above; the table lives in the library's image.
    let count = unsafe { define_table(loader, &*table) }?;
    debug!("{} precompiled classes from {}", count, opened.display());
    Ok(count)
}

/// Defines every entry of `table` in `loader`. The bytes are copied.
///
/// # Safety
/// Every pointer in `table` must be valid for its stated length.
pub unsafe fn define_table(loader: &ClassLoader, table: &PrecompiledTable) -> Result<usize> {
    if table.len == 0 {
        return Ok(0);
    }
    let classes = slice::from_raw_parts(table.classes, table.len);
    for class in classes {
        define_from_entry(loader, class)?;
    }
    Ok(classes.len())
}

unsafe fn define_from_entry(loader: &ClassLoader, class: &PrecompiledClass) -> Result<()> {
    let raw_name = slice::from_raw_parts(class.name, class.name_len);
    let name = std::str::from_utf8(raw_name)
        .map_err(|e| Error::internal(format!("precompiled class name is not UTF-8: {e}")))?;
    let bytes = slice::from_raw_parts(class.bytes, class.bytes_len).to_vec();
    let name = loader.names().intern(name);
    trace!("defining precompiled {name}");
    loader.define_class(&name, bytes)?;
    Ok(())
}
