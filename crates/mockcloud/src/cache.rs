//! YAML object cache
//!
//! The IP pool keeps its allocation tables here so they outlive a single
//! call. Entries are addressed by [`CacheKey`] and stored as YAML documents:
//!
//! ```text
//! <cache_dir>/<timestamp>/<cloud>/<region>/<datacenter>/<name>.yaml
//! ```
//!
//! `<timestamp>` is fixed when the [`FileCache`] is created, so each
//! simulator run writes into a fresh directory.

use mockcloud_core::{CacheBackend, CacheKey, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// File-backed cache rooted at `<dir>/<timestamp>/`
#[derive(Debug)]
pub struct FileCache {
    root: PathBuf,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileCache {
    /// Cache under a run directory named after the current time
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let stamp = chrono::Utc::now().timestamp_millis().to_string();
        Self::at(dir.as_ref().join(stamp))
    }

    /// Cache rooted exactly at `root`
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

impl CacheBackend for FileCache {
    fn read_value(&self, key: &CacheKey) -> Result<Option<serde_yaml::Value>> {
        let path = self.path_for(key);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        debug!(path = %path.display(), "Read cache entry");
        Ok(Some(serde_yaml::from_str(&text)?))
    }

    fn write_value(&self, key: &CacheKey, value: &serde_yaml::Value) -> Result<()> {
        let path = self.path_for(key);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_yaml::to_string(value)?)?;
        debug!(path = %path.display(), "Wrote cache entry");
        Ok(())
    }
}

/// In-process cache, for tests and ephemeral simulators
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, serde_yaml::Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCache {
    fn read_value(&self, key: &CacheKey) -> Result<Option<serde_yaml::Value>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(&key.relative_path()).cloned())
    }

    fn write_value(&self, key: &CacheKey, value: &serde_yaml::Value) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.relative_path(), value.clone());
        Ok(())
    }
}

/// Typed view over a [`CacheBackend`]
#[derive(Clone)]
pub struct ObjectCache {
    backend: Arc<dyn CacheBackend>,
}

impl ObjectCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    pub fn read_object<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        match self.backend.read_value(key)? {
            Some(value) => Ok(Some(serde_yaml::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn write_object<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let value = serde_yaml::to_value(value)?;
        self.backend.write_value(key, &value)
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache").finish_non_exhaustive()
    }
}
