//! Durable token storage
//!
//! A synchronous key-value surface. The client never assumes anything about
//! the backing store beyond read-your-writes.

use crate::error::StorageError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Storage key under which the bearer token is mirrored
pub const TOKEN_KEY: &str = "auth_token";

/// Key-value persistence for credentials
pub trait TokenStorage: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value
    fn set(&self, key: &str, value: &str);

    /// Delete a value; missing keys are ignored
    fn remove(&self, key: &str);
}

/// In-process storage, lost on restart
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStorage {
    /// Create empty storage
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// Storage persisted as a JSON object in a single file
///
/// Every read goes back to the file so a token written by another process is
/// seen on the next request; if the file cannot be read the last known copy is
/// served. Every write rewrites the file; a failed write is logged and the
/// in-memory value still changes.
#[derive(Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileTokenStorage {
    /// Open the store, creating an empty one if the file does not exist
    ///
    /// # Errors
    /// Fails if the file exists but cannot be read or is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = Self::load(&path)?;
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|source| StorageError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Backing file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) {
        let result = serde_json::to_string_pretty(entries)
            .map_err(std::io::Error::other)
            .and_then(|json| fs::write(&self.path, json));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), "failed to persist token store: {}", e);
        }
    }
}

impl TokenStorage for FileTokenStorage {
    fn get(&self, key: &str) -> Option<String> {
        match Self::load(&self.path) {
            Ok(entries) => {
                let value = entries.get(key).cloned();
                *self.entries.write() = entries;
                value
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to reload token store: {}", e);
                self.entries.read().get(key).cloned()
            }
        }
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_roundtrip() {
        let storage = MemoryTokenStorage::new();
        assert_eq!(storage.get(TOKEN_KEY), None);

        storage.set(TOKEN_KEY, "abc");
        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("abc"));

        storage.remove(TOKEN_KEY);
        storage.remove(TOKEN_KEY);
        assert_eq!(storage.get(TOKEN_KEY), None);
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let storage = FileTokenStorage::open(&path).unwrap();
        storage.set(TOKEN_KEY, "persisted");
        drop(storage);

        let reopened = FileTokenStorage::open(&path).unwrap();
        assert_eq!(reopened.get(TOKEN_KEY).as_deref(), Some("persisted"));

        reopened.remove(TOKEN_KEY);
        let again = FileTokenStorage::open(&path).unwrap();
        assert_eq!(again.get(TOKEN_KEY), None);
    }

    #[test]
    fn file_storage_sees_writes_from_another_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let reader = FileTokenStorage::open(&path).unwrap();
        let writer = FileTokenStorage::open(&path).unwrap();
        assert_eq!(reader.get(TOKEN_KEY), None);

        writer.set(TOKEN_KEY, "refreshed");
        assert_eq!(reader.get(TOKEN_KEY).as_deref(), Some("refreshed"));

        writer.remove(TOKEN_KEY);
        assert_eq!(reader.get(TOKEN_KEY), None);
    }

    #[test]
    fn file_storage_serves_last_copy_when_file_turns_bad() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let storage = FileTokenStorage::open(&path).unwrap();
        storage.set(TOKEN_KEY, "kept");
        fs::write(&path, "not json").unwrap();

        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("kept"));
    }

    #[test]
    fn file_storage_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileTokenStorage::open(&path),
            Err(StorageError::Corrupt { .. })
        ));
    }
}
