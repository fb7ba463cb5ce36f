//! Key-value persistence for configuration, identifiers and pending events.
//!
//! The SDK never interprets storage contents beyond its own keys, so hosts can plug in whatever
//! preferences store their platform offers by implementing [`Storage`].
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::Result;

/// A process-wide string key-value store.
///
/// Implementations must be thread-safe. Read failures should be reported as a missing value: the
/// SDK treats unavailable storage as empty storage.
pub trait Storage: Send + Sync {
    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove the value stored under `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Storage that lives as long as the process. This is the default storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty in-memory storage.
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        // A poisoned lock means a writer panicked. Treat as missing instead of crashing the host.
        let values = self.values.read().ok()?;
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_owned(), value);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
        Ok(())
    }
}

/// Storage backed by a single JSON file.
///
/// The whole file is loaded on [`FileStorage::open`] and rewritten after each modification.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    /// Open storage at `path`. A missing file is treated as empty storage; a file with invalid
    /// contents is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<FileStorage> {
        let path = path.into();

        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::warn!(target: "jentis", path:? = path; "ignoring unreadable storage file: {err}");
                HashMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(FileStorage {
            path,
            values: RwLock::new(values),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<()> {
        let bytes = serde_json::to_vec(values)?;

        // Write to a sibling file first, so a crash mid-write never truncates existing data.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<()> {
        let Ok(mut values) = self.values.write() else {
            return Ok(());
        };
        f(&mut values);
        self.persist(&values)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.read().ok()?;
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_owned(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}
