use crate::{
    error::{Error, Result},
    types::members::NativeAddress,
};
use dashmap::DashMap;
use libloading::Library;
use parking_lot::Mutex;
use std::{
    ffi::c_void,
    fmt::{Debug, Formatter},
    path::{Path, PathBuf},
};
use tracing::{debug, trace};

/// Dynamic libraries opened by one class loader, searched in load order.
#[derive(Default)]
pub struct NativeLibraries {
    libraries: DashMap<PathBuf, Library>,
    order: Mutex<Vec<PathBuf>>,
}

impl Debug for NativeLibraries {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.order.lock().iter()).finish()
    }
}

impl NativeLibraries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `name` as given, then with each platform library extension.
    pub fn find_library_path(name: impl AsRef<Path>) -> Option<PathBuf> {
        let exact = name.as_ref().to_path_buf();
        if exact.is_file() {
            return Some(exact);
        }

        #[cfg(target_os = "linux")]
        let extensions = &["so", "dylib", "dll"];
        #[cfg(target_os = "macos")]
        let extensions = &["dylib", "so", "dll"];
        #[cfg(target_os = "windows")]
        let extensions = &["dll", "so", "dylib"];
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        let extensions = &["so", "dll", "dylib"];

        extensions
            .iter()
            .map(|ext| exact.with_extension(ext))
            .find(|p| p.is_file())
    }

    /// Opens a library. Opening the same path twice is a no-op.
    pub fn load(&self, name: impl AsRef<Path>) -> Result<PathBuf> {
        let path = Self::find_library_path(&name).ok_or_else(|| {
            Error::UnsatisfiedLink(format!(
                "unable to find library '{}'",
                name.as_ref().display()
            ))
        })?;
        if self.libraries.contains_key(&path) {
            return Ok(path);
        }

        // SAFETY: loading a library runs its initializers; callers opt in to
        // that by asking for the library.
        let library = unsafe { Library::new(&path) }.map_err(|e| {
            Error::UnsatisfiedLink(format!("failed to load library '{}': {e}", path.display()))
        })?;
        debug!("loaded native library {}", path.display());

        let mut order = self.order.lock();
        if !self.libraries.contains_key(&path) {
            self.libraries.insert(path.clone(), library);
            order.push(path.clone());
        }
        Ok(path)
    }

    pub fn lookup(&self, symbol: &str) -> Option<NativeAddress> {
        let order = self.order.lock().clone();
        order.iter().find_map(|path| {
            let library = self.libraries.get(path)?;
            // SAFETY: only the symbol's address is taken, nothing is called.
            let address = unsafe { library.get::<*const c_void>(symbol.as_bytes()) }
                .ok()
                .map(|s| *s as NativeAddress)?;
            trace!("found {symbol} in {}", path.display());
            Some(address)
        })
    }

    /// Looks `symbol` up in the one library opened from `path`.
    pub fn symbol_in(&self, path: &Path, symbol: &str) -> Option<NativeAddress> {
        let library = self.libraries.get(path)?;
        // SAFETY: only the symbol's address is taken, nothing is called.
        unsafe { library.get::<*const c_void>(symbol.as_bytes()) }
            .ok()
            .map(|s| *s as NativeAddress)
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.order.lock().clone()
    }
}

/// Looks a symbol up among those already linked into the running process.
pub fn process_symbol(symbol: &str) -> Option<NativeAddress> {
    #[cfg(unix)]
    let this = libloading::os::unix::Library::this();
    #[cfg(windows)]
    let this = libloading::os::windows::Library::this().ok()?;

    // SAFETY: as above, the symbol is only resolved.
    unsafe { this.get::<*const c_void>(symbol.as_bytes()) }
        .ok()
        .map(|s| *s as NativeAddress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_libraries_are_unsatisfied_links() {
        let libs = NativeLibraries::new();
        let err = libs.load("/definitely/not/a/library").unwrap_err();
        assert!(matches!(err, Error::UnsatisfiedLink(_)));
        assert!(libs.is_empty());
    }

    #[test]
    fn unknown_symbols_are_not_found() {
        assert_eq!(process_symbol("Java_no_such_Symbol_anywhere"), None);
        assert_eq!(NativeLibraries::new().lookup("anything"), None);
    }
}
