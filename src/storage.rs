//! Key-value persistence for the request counters.
//!
//! Every counter lives under its own key and is read independently, so a
//! store that is missing a key (fresh install, partial write by an older
//! version) simply reports that key as absent.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::trace;

use crate::errors::{IoOperation, StorageError};

pub const KEY_TOTAL_REQUESTS: &str = "total_requests";
pub const KEY_BLOCKED_REQUESTS: &str = "blocked_requests";
pub const KEY_ALLOWED_REQUESTS: &str = "allowed_requests";
pub const KEY_REDIRECTED_REQUESTS: &str = "redirected_requests";

/// Durable storage of 64-bit values by key.
pub trait StatsStore: Send + Sync {
    /// Read a single key. `Ok(None)` when the key has never been written.
    fn get(&self, key: &str) -> Result<Option<u64>, StorageError>;

    /// Write all entries as one unit.
    fn put_all(&self, entries: &[(&str, u64)]) -> Result<(), StorageError>;
}

/// Counters stored as a flat JSON object, replaced atomically on every write.
///
/// Writes are not fsynced, so a crash may lose the most recent values. A
/// file left unreadable by a crash loads as zero.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_object(&self) -> Result<Option<Map<String, Value>>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(IoOperation::Read, &self.path, e)),
        };

        let value: Value =
            serde_json::from_str(&content).map_err(|source| StorageError::Format {
                path: self.path.clone(),
                source,
            })?;

        match value {
            Value::Object(map) => Ok(Some(map)),
            other => Err(StorageError::invalid_value(
                "<root>",
                format!("expected an object, found {other}"),
            )),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StatsStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let Some(map) = self.read_object()? else {
            return Ok(None);
        };

        match map.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| StorageError::invalid_value(key, format!("not a u64: {value}"))),
        }
    }

    fn put_all(&self, entries: &[(&str, u64)]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StorageError::io(IoOperation::CreateDir, parent, e))?;
            }
        }

        let map: Map<String, Value> = entries
            .iter()
            .map(|(key, value)| (key.to_string(), Value::from(*value)))
            .collect();
        let content = serde_json::to_vec_pretty(&Value::Object(map)).map_err(|source| {
            StorageError::Format {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp = self.temp_path();
        let mut file =
            fs::File::create(&tmp).map_err(|e| StorageError::io(IoOperation::Write, &tmp, e))?;
        file.write_all(&content)
            .map_err(|e| StorageError::io(IoOperation::Write, &tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .map_err(|e| StorageError::io(IoOperation::Rename, &self.path, e))?;

        trace!("Persisted {} keys to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// In-process store. Values survive as long as the store itself.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, u64>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, value: u64) {
        self.values.lock().insert(key.to_string(), value);
    }
}

impl StatsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.values.lock().get(key).copied())
    }

    fn put_all(&self, entries: &[(&str, u64)]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("writes disabled"));
        }

        let mut values = self.values.lock();
        for (key, value) in entries {
            values.insert(key.to_string(), *value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("stats.json"));

        assert_eq!(store.get(KEY_TOTAL_REQUESTS).unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_all_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.json");
        let store = JsonFileStore::new(&path);

        store
            .put_all(&[(KEY_TOTAL_REQUESTS, 7), (KEY_BLOCKED_REQUESTS, 4)])
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get(KEY_TOTAL_REQUESTS).unwrap(), Some(7));
        assert_eq!(reopened.get(KEY_BLOCKED_REQUESTS).unwrap(), Some(4));
        assert_eq!(reopened.get(KEY_ALLOWED_REQUESTS).unwrap(), None);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_bad_value_is_reported_per_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, r#"{"total_requests": -3, "blocked_requests": 2}"#).unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get(KEY_TOTAL_REQUESTS),
            Err(StorageError::InvalidValue { .. })
        ));
        assert_eq!(store.get(KEY_BLOCKED_REQUESTS).unwrap(), Some(2));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get(KEY_TOTAL_REQUESTS),
            Err(StorageError::Format { .. })
        ));
    }

    #[test]
    fn test_memory_store_write_failure() {
        let store = MemoryStore::new();
        store.put_all(&[(KEY_TOTAL_REQUESTS, 1)]).unwrap();

        store.set_fail_writes(true);
        assert!(store.put_all(&[(KEY_TOTAL_REQUESTS, 2)]).is_err());
        assert_eq!(store.get(KEY_TOTAL_REQUESTS).unwrap(), Some(1));
    }
}
