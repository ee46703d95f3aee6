pub mod arguments;
pub mod model_store;
pub mod records;

pub use arguments::FeatureArguments;
pub use model_store::{load_ranking_constant_values, ModelStore, PendingWrites};
pub use records::{check_name, LargeConstantRecord, MacroRecord, Record, SmallConstantRecord};

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Hierarchical file access with '/'-separated paths relative to the
/// application root.
pub trait FileStore: Send + Sync {
    fn exists(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Writes a file, creating missing parent directories.
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Appends to a file, creating it and its parents if missing.
    fn append(&self, path: &str, text: &str) -> Result<()>;

    /// Paths of the direct children of a directory, sorted; empty if the
    /// directory does not exist.
    fn list_children(&self, path: &str) -> Result<Vec<String>>;

    fn create_directories(&self, path: &str) -> Result<()>;

    fn read_to_string(&self, path: &str) -> Result<String> {
        let data = self.read(path)?;
        String::from_utf8(data).map_err(|e| {
            Error::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }
}

pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), child)
    }
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i])
}

pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |full, part| full.join(part))
    }

    fn create_parent(&self, path: &str) -> Result<()> {
        match parent_of(path) {
            Some(parent) => self.create_directories(parent),
            None => Ok(()),
        }
    }
}

impl FileStore for DiskFileStore {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(path)).map_err(|e| Error::io(path, e))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.create_parent(path)?;
        fs::write(self.resolve(path), data).map_err(|e| Error::io(path, e))
    }

    fn append(&self, path: &str, text: &str) -> Result<()> {
        self.create_parent(path)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(path))
            .map_err(|e| Error::io(path, e))?;
        file.write_all(text.as_bytes()).map_err(|e| Error::io(path, e))
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let directory = self.resolve(path);
        if !directory.is_dir() {
            return Ok(Vec::new());
        }
        let mut children = Vec::new();
        for entry in fs::read_dir(&directory).map_err(|e| Error::io(path, e))? {
            let entry = entry.map_err(|e| Error::io(path, e))?;
            if let Some(name) = entry.file_name().to_str() {
                children.push(join(path, name));
            }
        }
        children.sort();
        Ok(children)
    }

    fn create_directories(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path)).map_err(|e| Error::io(path, e))
    }
}

/// A file store held in memory, for tests and dry runs.
#[derive(Default)]
pub struct MemoryFileStore {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    directories: RwLock<BTreeSet<String>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All file paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    fn add_parents(&self, path: &str) {
        let mut directories = self.directories.write();
        let mut current = parent_of(path);
        while let Some(directory) = current {
            directories.insert(directory.to_string());
            current = parent_of(directory);
        }
    }
}

fn normalize(path: &str) -> String {
    path.split('/').filter(|part| !part.is_empty()).collect::<Vec<_>>().join("/")
}

impl FileStore for MemoryFileStore {
    fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        self.files.read().contains_key(&path) || self.directories.read().contains(&path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.files.read().get(&normalize(path)).cloned().ok_or_else(|| {
            Error::io(path, std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = normalize(path);
        self.add_parents(&path);
        self.files.write().insert(path, data.to_vec());
        Ok(())
    }

    fn append(&self, path: &str, text: &str) -> Result<()> {
        let path = normalize(path);
        self.add_parents(&path);
        self.files
            .write()
            .entry(path)
            .or_default()
            .extend_from_slice(text.as_bytes());
        Ok(())
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize(path);
        let mut children: Vec<String> = self
            .files
            .read()
            .keys()
            .chain(self.directories.read().iter())
            .filter(|candidate| parent_of(candidate).map_or(path.is_empty(), |p| p == path))
            .cloned()
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }

    fn create_directories(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        self.add_parents(&path);
        self.directories.write().insert(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn FileStore) {
        assert!(!store.exists("a/b/c.txt"));
        store.write("a/b/c.txt", b"hello").unwrap();
        assert!(store.exists("a/b/c.txt"));
        assert!(store.exists("a/b"));
        store.append("a/b/c.txt", " world").unwrap();
        assert_eq!(store.read_to_string("a/b/c.txt").unwrap(), "hello world");

        store.append("a/d.txt", "x").unwrap();
        store.create_directories("a/e/f").unwrap();
        assert_eq!(store.list_children("a").unwrap(), vec!["a/b", "a/d.txt", "a/e"]);
        assert!(store.list_children("missing").unwrap().is_empty());
        assert!(matches!(store.read("missing.txt"), Err(Error::Io { .. })));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryFileStore::new());
    }

    #[test]
    fn test_disk_store() {
        let root = std::env::temp_dir().join(format!("rankmodel-{}", uuid::Uuid::new_v4()));
        exercise(&DiskFileStore::new(&root));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/", "b"), "a/b");
    }
}
