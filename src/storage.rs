use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::eid::Eid;

/// Byte-level key/value persistence used by the stack store and config.
pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
}

/// Files in a single directory. Writes go through a temp file + rename so a
/// crash never leaves a half-written file behind.
#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal { base_dir: path })
    }

    fn path_of(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path_of(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path_of(ident))
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let temp_path = self.base_dir.join(format!("{}-{ident}", Eid::new()));

        std::fs::write(&temp_path, data)?;

        std::fs::rename(&temp_path, self.path_of(ident))
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.path_of(ident))
    }
}

/// Volatile backend, used for sessions that should not touch disk.
#[derive(Debug, Default)]
pub struct BackendMemory {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl BackendMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "memory storage lock poisoned")
}

impl StorageManager for BackendMemory {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let mut files = self.files.write().map_err(|_| poisoned())?;
        files.insert(ident.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        let files = self.files.read().map_err(|_| poisoned())?;
        files.get(ident).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("{ident} not found"))
        })
    }

    fn exists(&self, ident: &str) -> bool {
        self.files
            .read()
            .map(|files| files.contains_key(ident))
            .unwrap_or(false)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        let mut files = self.files.write().map_err(|_| poisoned())?;
        files.remove(ident);
        Ok(())
    }
}
