//! Persistent string key-value storage backends.
//!
//! This is the process-local equivalent of browser local storage: synchronous,
//! scoped to the application, surviving restarts, with bounded capacity.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::StorageError;

/// Keychain service name used by [`KeyringStorage`]
const SERVICE_NAME: &str = "storefront";

/// Storage file name in the data directory
const STORAGE_FILE: &str = "storage.json";

/// Which storage backend to use for persisted tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl StorageBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Some(StorageBackend::File),
            "keyring" | "keychain" => Some(StorageBackend::Keyring),
            "memory" => Some(StorageBackend::Memory),
            _ => None,
        }
    }
}

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ============================================================================
// File storage
// ============================================================================

/// JSON object stored in a single file, rewritten on every change.
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Storage file inside the given data directory
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORAGE_FILE))
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, serde_json::to_string_pretty(map)?.as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Write a file readable by the owner only (0600 on unix)
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    // A leftover file would keep its old mode
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)?;
        debug!(key, path = %self.path.display(), "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

// ============================================================================
// OS keychain storage
// ============================================================================

/// One keychain entry per key under the `storefront` service.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let entry = Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Process-local storage. Does not survive a restart.
///
/// An optional byte capacity (keys plus values) mimics a storage quota, and a
/// disabled store fails every call.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    capacity: Option<usize>,
    disabled: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.disabled {
            return Err(StorageError::Disabled);
        }
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.disabled {
            return Err(StorageError::Disabled);
        }
        let mut entries = self.entries.lock();
        if let Some(capacity) = self.capacity {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
                + key.len()
                + value.len();
            if used > capacity {
                return Err(StorageError::QuotaExceeded { used, capacity });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.disabled {
            return Err(StorageError::Disabled);
        }
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("storefront-test-{}-{}", std::process::id(), name))
            .join(STORAGE_FILE)
    }

    #[test]
    fn test_file_storage_set_get_remove() {
        let path = temp_path("set-get-remove");
        let storage = FileStorage::new(path.clone());

        assert_eq!(storage.get("a").unwrap(), None);
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));

        // A second handle on the same file sees the data (survives "restart")
        let reopened = FileStorage::new(path.clone());
        assert_eq!(reopened.get("b").unwrap().as_deref(), Some("2"));

        storage.remove("a").unwrap();
        storage.remove("a").unwrap(); // idempotent
        assert_eq!(reopened.get("a").unwrap(), None);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_path("mode");
        let storage = FileStorage::new(path.clone());
        storage.set("kc_token", "secret").unwrap();
        storage.set("kc_refreshToken", "secret").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_file_storage_corrupt_file() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let storage = FileStorage::new(path.clone());
        assert!(matches!(storage.get("a"), Err(StorageError::Corrupt(_))));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_memory_storage_quota() {
        let storage = MemoryStorage::with_capacity(10);
        storage.set("k", "12345").unwrap(); // 6 bytes
        assert!(matches!(
            storage.set("j", "12345"),
            Err(StorageError::QuotaExceeded { used: 12, capacity: 10 })
        ));
        // Overwriting an existing key only counts the new value
        storage.set("k", "123456789").unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_memory_storage_disabled() {
        let storage = MemoryStorage::disabled();
        assert!(matches!(storage.get("k"), Err(StorageError::Disabled)));
        assert!(matches!(storage.set("k", "v"), Err(StorageError::Disabled)));
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!(StorageBackend::parse("File"), Some(StorageBackend::File));
        assert_eq!(StorageBackend::parse("keychain"), Some(StorageBackend::Keyring));
        assert_eq!(StorageBackend::parse(" memory "), Some(StorageBackend::Memory));
        assert_eq!(StorageBackend::parse("cookie"), None);
    }
}
