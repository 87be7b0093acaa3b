//! Object storage collaborator
//!
//! The orchestrator only needs two calls: fetch a named blob and store one.
//! Neither retries; failures surface as [`Error::Storage`].

use std::collections::HashMap;
use std::fs::{create_dir_all, read, write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use url::Url;

use crate::error::{Error, Result};

pub trait Storage: Send + Sync {
    /// Read the blob at `locator` (`bucket/path/to/object`)
    fn fetch(&self, locator: &str) -> Result<Vec<u8>>;

    /// Write `bytes` to `locator`, returning where the blob can be found
    fn store(&self, bytes: &[u8], locator: &str) -> Result<String>;
}

/// Storage backed by a local directory: `bucket/key` maps to `<root>/bucket/key`
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf> {
        let relative = Path::new(locator.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::Storage(format!("Invalid locator: {:?}", locator)));
        }
        Ok(self.root.join(relative))
    }
}

impl Storage for LocalStorage {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let path = self.resolve(locator)?;
        log::info!("Fetching {} from {:?}", locator, path);
        read(&path).map_err(|e| Error::Storage(format!("Failed to fetch {}: {}", locator, e)))
    }

    fn store(&self, bytes: &[u8], locator: &str) -> Result<String> {
        let path = self.resolve(locator)?;
        if let Some(parent) = path.parent() {
            create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
        write(&path, bytes)
            .map_err(|e| Error::Storage(format!("Failed to store {}: {}", locator, e)))?;
        log::info!("Stored {} ({} bytes)", locator, bytes.len());

        let absolute = path.canonicalize().unwrap_or(path);
        Ok(Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| absolute.to_string_lossy().to_string()))
    }
}

/// In-memory storage, for tests and embedding callers
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Lock the blob map, recovering it if a writer panicked
    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, locator: &str, bytes: Vec<u8>) {
        self.blobs().insert(locator.to_string(), bytes);
    }

    pub fn get(&self, locator: &str) -> Option<Vec<u8>> {
        self.blobs().get(locator).cloned()
    }

    pub fn locators(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Storage for MemoryStorage {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        self.get(locator)
            .ok_or_else(|| Error::Storage(format!("Object not found: {}", locator)))
    }

    fn store(&self, bytes: &[u8], locator: &str) -> Result<String> {
        self.insert(locator, bytes.to_vec());
        Ok(format!("memory://{}", locator))
    }
}
