// ============================
// crates/backend-lib/src/local_store.rs
// ============================
//! Durable device-side key-value storage and the SOS recovery pointers kept in it.
use crate::error::AppError;
use crate::validation::validate_storage_key;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key of the pointer to the SOS this device currently owns
pub const ACTIVE_SOS_KEY: &str = "active_sos_id";
const TOKEN_KEY_PREFIX: &str = "sos_token_";

pub fn token_key(sos_id: &str) -> String {
    format!("{TOKEN_KEY_PREFIX}{sos_id}")
}

/// Synchronous string key-value store that survives restarts
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;

    /// Deleting an absent key is not an error
    fn delete(&self, key: &str) -> Result<(), AppError>;
}

/// Flat-file implementation: one file per key under `root`
#[derive(Clone)]
pub struct FlatFileKeyValueStore {
    root: PathBuf,
}

impl FlatFileKeyValueStore {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        let key = validate_storage_key(key)?;
        Ok(self.root.join(key))
    }
}

impl KeyValueStore for FlatFileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file then rename, so a crash never leaves half a value
    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        let tmp = self.root.join(format!(".{key}.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory implementation
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), AppError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// The two pieces of state a device needs to cancel or resume its SOS after
/// a restart or logout: the active event id and that event's token.
#[derive(Clone)]
pub struct RecoveryStore {
    kv: Arc<dyn KeyValueStore>,
}

impl RecoveryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Persist the token first so the pointer never references a missing token
    pub fn remember(&self, sos_id: &str, token: &str) -> Result<(), AppError> {
        self.kv.set(&token_key(sos_id), token)?;
        self.kv.set(ACTIVE_SOS_KEY, sos_id)
    }

    pub fn active_id(&self) -> Result<Option<String>, AppError> {
        Ok(self
            .kv
            .get(ACTIVE_SOS_KEY)?
            .filter(|id| !id.trim().is_empty()))
    }

    pub fn token_for(&self, sos_id: &str) -> Result<Option<String>, AppError> {
        self.kv.get(&token_key(sos_id))
    }

    /// Drop the token for `sos_id`, and the active pointer when it points there
    pub fn forget(&self, sos_id: &str) -> Result<(), AppError> {
        self.kv.delete(&token_key(sos_id))?;
        if self.active_id()?.as_deref() == Some(sos_id) {
            self.kv.delete(ACTIVE_SOS_KEY)?;
        }
        Ok(())
    }

    /// Drop the active pointer whatever it references
    pub fn clear_active(&self) -> Result<(), AppError> {
        self.kv.delete(ACTIVE_SOS_KEY)
    }
}
