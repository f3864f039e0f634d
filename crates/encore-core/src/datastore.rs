use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const COLLECTION_KEY: &str = "collection";
pub const SETTINGS_KEY: &str = "settings";
pub const DISPLAY_SETTINGS_KEY: &str = "display_settings";
pub const PARENT_SORT_KEY: &str = "sort.parents";
pub const ITEM_SORT_KEY: &str = "sort.items";
pub const IMAGES_KEY: &str = "images";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage is full: writing {key} needs {needed} bytes, quota is {quota}")]
    QuotaExceeded {
        key: String,
        needed: u64,
        quota: u64,
    },

    #[error("failed to serialize {key}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage unavailable while writing {key}")]
    Unavailable {
        key: String,
        #[source]
        source: io::Error,
    },
}

impl PersistError {
    pub fn is_storage_full(&self) -> bool {
        matches!(self, PersistError::QuotaExceeded { .. })
    }

    /// Blocking message for the user. In-memory state is kept either way.
    pub fn user_message(&self) -> String {
        if self.is_storage_full() {
            "Storage is full. Your latest change is kept for this session but \
             was not saved; free space or remove images, then try again."
                .to_string()
        } else {
            format!("Saving failed ({self}). Your latest change is kept for this session.")
        }
    }
}

/// Durable key to JSON-text map.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError>;
}

/// One `<key>.json` file per key in the data directory.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, quota_bytes: Option<u64>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(
            data_dir = %data_dir.display(),
            quota_bytes = ?quota_bytes,
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            quota_bytes,
        })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }

    /// Bytes used by every key except `skip`.
    fn used_bytes_except(&self, skip: &Path) -> u64 {
        let Ok(entries) = fs::read_dir(&self.data_dir) else {
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path() != skip)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }
}

impl KeyValueStore for DataStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Some(raw),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(file = %path.display(), "key not stored yet");
                None
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "failed reading key; using default");
                None
            }
        }
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let path = self.path_for(key);

        if let Some(quota) = self.quota_bytes {
            let needed = self.used_bytes_except(&path) + value.len() as u64;
            if needed > quota {
                return Err(PersistError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }

        save_atomic(&path, value).map_err(|source| {
            if source.kind() == io::ErrorKind::StorageFull {
                PersistError::QuotaExceeded {
                    key: key.to_string(),
                    needed: value.len() as u64,
                    quota: 0,
                }
            } else {
                PersistError::Unavailable {
                    key: key.to_string(),
                    source,
                }
            }
        })?;

        debug!(file = %path.display(), "saved key");
        Ok(())
    }
}

fn save_atomic(path: &Path, value: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(value.as_bytes())?;
    temp.flush()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Mutex<Option<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: Mutex::new(Some(quota_bytes)),
        }
    }

    /// Changes the quota for later writes; existing entries are kept.
    pub fn set_quota(&self, quota_bytes: Option<u64>) {
        *self.quota_bytes.lock() = quota_bytes;
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let mut entries = self.entries.lock();
        if let Some(quota) = *self.quota_bytes.lock() {
            let others: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len() as u64)
                .sum();
            let needed = others + value.len() as u64;
            if needed > quota {
                return Err(PersistError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Reads and decodes a key, falling back to `T::default()` when it is
/// missing or does not decode.
pub fn load_or_default<T>(kv: &dyn KeyValueStore, key: &str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    let Some(raw) = kv.get(key) else {
        return T::default();
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(key, error = %err, "stored value is not valid; using default");
            T::default()
        }
    }
}

pub fn save_json<T>(kv: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), PersistError>
where
    T: serde::Serialize + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|source| PersistError::Serialize {
        key: key.to_string(),
        source,
    })?;
    kv.set(key, &raw)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{DataStore, KeyValueStore, MemoryStore, load_or_default, save_json};

    #[test]
    fn file_store_round_trips_and_misses_cleanly() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), None).expect("open datastore");

        assert_eq!(store.get("settings"), None);
        store.set("settings", "{\"a\":1}").expect("set");
        assert_eq!(store.get("settings").as_deref(), Some("{\"a\":1}"));
        assert!(store.path_for("settings").exists());
    }

    #[test]
    fn quota_overflow_is_reported_as_storage_full() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), Some(16)).expect("open datastore");
        store.set("small", "[1,2,3]").expect("fits");

        let err = store
            .set("big", "[1,2,3,4,5,6,7,8,9,10]")
            .expect_err("over quota");
        assert!(err.is_storage_full());
        assert!(err.user_message().contains("Storage is full"));
        assert_eq!(store.get("big"), None);
    }

    #[test]
    fn invalid_json_degrades_to_default() {
        let store = MemoryStore::new();
        store.insert_raw("numbers", "{not json");
        let loaded: Vec<u32> = load_or_default(&store, "numbers");
        assert!(loaded.is_empty());

        save_json(&store, "numbers", &vec![1_u32, 2]).expect("save");
        let loaded: Vec<u32> = load_or_default(&store, "numbers");
        assert_eq!(loaded, vec![1, 2]);
    }
}
