//! Byte providers consulted by the bootstrap loader.
use crate::error::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    ffi::OsStr,
    fmt::{Debug, Formatter},
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{trace, warn};
use zip::{result::ZipError, ZipArchive};

/// Something that can produce class bytes for an internal class name.
pub trait ClassSource: Send + Sync + Debug {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Archives are searched after every plain source.
    fn is_archive(&self) -> bool {
        false
    }
}

/// A directory tree holding `<name>.class` files.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ClassSource for DirectorySource {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(format!("{name}.class"));
        match std::fs::read(&path) {
            Ok(bytes) => {
                trace!("read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A zip container (`.jar`, `.zip`) with `<name>.class` entries.
pub struct ArchiveSource {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

impl Debug for ArchiveSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSource")
            .field("path", &self.path)
            .finish()
    }
}

impl ArchiveSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let archive = ZipArchive::new(File::open(&path)?)?;
        Ok(Self {
            path,
            archive: Mutex::new(archive),
        })
    }

    pub fn len(&self) -> usize {
        self.archive.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClassSource for ArchiveSource {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut archive = self.archive.lock();
        let mut entry = match archive.by_name(&format!("{name}.class")) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        trace!("read {name} from {}", self.path.display());
        Ok(Some(bytes))
    }

    fn is_archive(&self) -> bool {
        true
    }
}

/// Classes held in memory, for embedders and tests.
#[derive(Default)]
pub struct MemorySource {
    classes: DashMap<String, Arc<[u8]>>,
}

impl Debug for MemorySource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySource")
            .field("classes", &self.classes.len())
            .finish()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.classes.insert(name.into(), bytes.into());
    }

    pub fn with(self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl ClassSource for MemorySource {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.classes.get(name).map(|b| b.to_vec()))
    }
}

/// Ordered search path: every plain source first, then archives, each group
/// in insertion order. The first hit wins.
#[derive(Debug, Default)]
pub struct ClassPath {
    sources: Vec<Arc<dyn ClassSource>>,
    archives: Vec<Arc<dyn ClassSource>>,
}

impl ClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a platform-separated list of directories and archives.
    /// Entries that do not exist are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut path = Self::new();
        for entry in std::env::split_paths(OsStr::new(text)) {
            if entry.as_os_str().is_empty() {
                continue;
            }
            path.add_entry(&entry)?;
        }
        Ok(path)
    }

    /// Adds a directory or archive based on what `entry` is on disk.
    pub fn add_entry(&mut self, entry: &Path) -> Result<()> {
        if entry.is_dir() {
            self.push(Arc::new(DirectorySource::new(entry)));
        } else if entry.is_file() {
            self.push(Arc::new(ArchiveSource::open(entry)?));
        } else {
            warn!("class path entry {} does not exist", entry.display());
        }
        Ok(())
    }

    pub fn push(&mut self, source: Arc<dyn ClassSource>) {
        if source.is_archive() {
            self.archives.push(source);
        } else {
            self.sources.push(source);
        }
    }

    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        for source in self.sources.iter().chain(&self.archives) {
            if let Some(bytes) = source.read(name)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.sources.len() + self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
