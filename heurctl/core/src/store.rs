//! Persisted Configuration Cache
//!
//! Durable key/value storage for the last-known job configuration. Each key
//! holds one JSON document; writers are last-write-wins.
//!
//! - [`FileConfigStore`]: one `<key>.json` file per key under a cache
//!   directory, replaced atomically via temp file + rename
//! - [`MemoryConfigStore`]: shared in-memory map for tests and embedding

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors from the configuration cache
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Stored document is not valid JSON
    #[error("cache entry `{key}` is corrupt: {source}")]
    Corrupt {
        /// Cache key
        key: String,
        /// Decode error
        #[source]
        source: serde_json::Error,
    },

    /// Document could not be encoded
    #[error("cannot encode cache entry `{key}`: {source}")]
    Encode {
        /// Cache key
        key: String,
        /// Encode error
        #[source]
        source: serde_json::Error,
    },

    /// Key would escape the cache directory
    #[error("invalid cache key `{0}`")]
    InvalidKey(String),
}

/// Durable storage for configuration snapshots
pub trait ConfigStore {
    /// Read a key; `Ok(None)` when absent
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the entry exists but cannot be read or
    /// decoded.
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a key, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the entry cannot be written.
    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}

fn check_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

// ============================================================================
// File store
// ============================================================================

/// One JSON file per key under a directory
#[derive(Clone, Debug)]
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        check_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let text = serde_json::to_string_pretty(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(key, path = %path.display(), "Cache entry written");
        Ok(())
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// In-memory store; clones share the same map
#[derive(Clone, Debug, Default)]
pub struct MemoryConfigStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryConfigStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        check_key(key)?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        check_key(key)?;
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}
