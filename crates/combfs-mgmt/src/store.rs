//! Durable cluster-wide property store.
//!
//! The monitor persists the saved watermark and the expansion latch here.
//! Writes are small last-writer-wins batches; there are no transactions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

/// Persisted query integrity watermark.
pub const KEY_SAVED_QUERY_INTEGRITY_TIME: &str = "combfs.watermark.saved_query_integrity_time";
/// Persisted expansion latch state.
pub const KEY_EXPANSION_STATE: &str = "combfs.expansion.state";
/// Persisted expansion start time.
pub const KEY_EXPANSION_START_TIME: &str = "combfs.expansion.start_time";
/// Persisted expansion disk mask, as JSON.
pub const KEY_EXPANSION_DISK_MASK: &str = "combfs.expansion.disk_mask";

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Contents did not (de)serialize.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Cluster-wide key/value properties.
pub trait ConfigStore: Send + Sync {
    /// Value of `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes every entry as one batch.
    fn put_all(&self, entries: BTreeMap<String, String>) -> Result<(), StoreError>;

    /// Writes one entry.
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = BTreeMap::new();
        entries.insert(key.to_string(), value.to_string());
        self.put_all(entries)
    }

    /// Value of `key` parsed as an integer.
    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

/// Stored value with its batch version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Raw value.
    pub value: String,
    /// Version of the batch that wrote it.
    pub version: u64,
    /// Write time, epoch ms.
    pub timestamp_ms: u64,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, ConfigEntry>,
    version_counter: u64,
}

impl Entries {
    fn apply(&mut self, entries: BTreeMap<String, String>) {
        self.version_counter += 1;
        let timestamp_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        for (key, value) in entries {
            self.map.insert(
                key,
                ConfigEntry {
                    value,
                    version: self.version_counter,
                    timestamp_ms,
                },
            );
        }
    }
}

/// In-process store. Used by tests and by deployments that accept losing
/// the latch on restart.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: Mutex<Entries>,
}

impl MemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of the latest batch.
    #[cfg(test)]
    pub fn current_version(&self) -> u64 {
        self.inner.lock().version_counter
    }

    /// Entry of `key` with its metadata.
    #[cfg(test)]
    pub fn entry(&self, key: &str) -> Option<ConfigEntry> {
        self.inner.lock().map.get(key).cloned()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().map.get(key).map(|e| e.value.clone())
    }

    fn put_all(&self, entries: BTreeMap<String, String>) -> Result<(), StoreError> {
        self.inner.lock().apply(entries);
        Ok(())
    }
}

/// Runs file I/O off the async scheduler when called from a multi-thread
/// runtime worker. Elsewhere it runs inline, since `block_in_place` panics on
/// a current-thread runtime.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u64,
    entries: BTreeMap<String, ConfigEntry>,
}

/// JSON file store. Every batch rewrites the file through a temp file and
/// rename so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    inner: Mutex<Entries>,
}

impl FileConfigStore {
    /// Opens the store at `path`, loading it if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut entries = Entries::default();
        if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let file: StoreFile = serde_json::from_str(&contents)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            entries.version_counter = file.version;
            entries.map = file.entries.into_iter().collect();
            debug!(path = %path.display(), keys = entries.map.len(), "loaded config store");
        }
        Ok(Self {
            path,
            inner: Mutex::new(entries),
        })
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, entries: &Entries) -> Result<(), StoreError> {
        let file = StoreFile {
            version: entries.version_counter,
            entries: entries
                .map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().map.get(key).map(|e| e.value.clone())
    }

    fn put_all(&self, entries: BTreeMap<String, String>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.apply(entries);
        run_blocking(|| self.write(&inner))
    }
}
