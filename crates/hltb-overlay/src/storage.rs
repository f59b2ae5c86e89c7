//! Persistent key-value regions backing the cache.
//!
//! Mirrors the browser `localStorage` contract the cache was designed
//! against: string values under string keys, with writes that can fail when
//! the medium is full.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::{OverlayError, OverlayResult};

/// A scoped string key-value store.
pub trait KvStore {
    /// Read a value. `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> OverlayResult<Option<String>>;
    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> OverlayResult<()>;
    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> OverlayResult<()>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    max_bytes: Option<usize>,
}

impl FileStore {
    /// Store files under `dir`, creating it on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: None,
        }
    }

    /// Reject values larger than `max_bytes`, like a storage quota.
    pub fn with_quota(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Directory holding the files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> OverlayResult<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> OverlayResult<()> {
        check_quota(self.max_bytes, value)?;
        std::fs::create_dir_all(&self.dir)?;

        // Write-then-rename so a crash mid-write never leaves a torn file.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        tracing::trace!("wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> OverlayResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    max_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject values larger than `max_bytes`, like a storage quota.
    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            max_bytes: Some(max_bytes),
        }
    }

    /// Pre-populate a key, bypassing the quota.
    pub fn with_value(self, key: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        self
    }

    fn lock(&self) -> OverlayResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| OverlayError::Storage("memory store lock poisoned".to_string()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> OverlayResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> OverlayResult<()> {
        check_quota(self.max_bytes, value)?;
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> OverlayResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

impl<T: KvStore + ?Sized> KvStore for std::rc::Rc<T> {
    fn get(&self, key: &str) -> OverlayResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> OverlayResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> OverlayResult<()> {
        (**self).remove(key)
    }
}

fn check_quota(max_bytes: Option<usize>, value: &str) -> OverlayResult<()> {
    match max_bytes {
        Some(max) if value.len() > max => Err(OverlayError::Storage(format!(
            "quota exceeded: {} bytes exceeds {max} bytes",
            value.len()
        ))),
        _ => Ok(()),
    }
}
