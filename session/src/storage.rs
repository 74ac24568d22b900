//! Durable client storage for the auth token and the cached user snapshot.
//!
//! SYSTEM CONTEXT
//! ==============
//! Browsers back this with `localStorage`; native front-ends use the JSON
//! file store. Only the session manager and the gateway write through
//! [`CredentialCache`], and every write is last-write-wins.
//!
//! ERROR HANDLING
//! ==============
//! Reads degrade to "absent" with a warning so a corrupt cache never blocks
//! startup. Writes return errors so the caller can decide whether to surface
//! them.

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::User;

pub const TOKEN_KEY: &str = "auth_token";
pub const USER_KEY: &str = "auth_user";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// String key/value storage that survives restarts.
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backing medium cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backing medium cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Process-local store. Used in tests and for ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// JSON object on disk, one entry per key. Writes go through a temp file and
/// a rename so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries = self.read_all()?;
        apply(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

// =============================================================================
// CREDENTIAL CACHE
// =============================================================================

/// Cached snapshot of the last authenticated user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    pub user: User,
    /// Milliseconds since the Unix epoch when the snapshot was written.
    pub saved_at: i64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Typed view over a [`KeyValueStore`] for the token and user snapshot.
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Cache backed by a fresh [`MemoryStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "token read failed; treating as signed out");
                None
            }
        }
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    /// # Errors
    ///
    /// Returns a [`StorageError`] if the write fails.
    pub fn set_token(&self, token: &str) -> Result<(), StorageError> {
        self.store.set(TOKEN_KEY, token)
    }

    /// # Errors
    ///
    /// Returns a [`StorageError`] if the write fails.
    pub fn clear_token(&self) -> Result<(), StorageError> {
        self.store.remove(TOKEN_KEY)
    }

    #[must_use]
    pub fn stored_user(&self) -> Option<User> {
        self.stored_snapshot().map(|snapshot| snapshot.user)
    }

    /// Full snapshot including its timestamp. Unparseable data reads as absent.
    #[must_use]
    pub fn stored_snapshot(&self) -> Option<StoredUser> {
        let raw = match self.store.get(USER_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "stored user read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "stored user is corrupt; ignoring");
                None
            }
        }
    }

    /// # Errors
    ///
    /// Returns a [`StorageError`] if serialization or the write fails.
    pub fn persist_user(&self, user: &User) -> Result<(), StorageError> {
        let snapshot = StoredUser { user: user.clone(), saved_at: now_ms() };
        self.store.set(USER_KEY, &serde_json::to_string(&snapshot)?)
    }

    /// # Errors
    ///
    /// Returns a [`StorageError`] if the write fails.
    pub fn clear_user(&self) -> Result<(), StorageError> {
        self.store.remove(USER_KEY)
    }

    /// Remove both the token and the user snapshot. Both removals are
    /// attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] encountered.
    pub fn clear(&self) -> Result<(), StorageError> {
        let token = self.clear_token();
        let user = self.clear_user();
        token.and(user)
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("has_token", &self.has_token())
            .finish_non_exhaustive()
    }
}
