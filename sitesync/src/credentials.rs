//! Persisted login state.
//!
//! The auth token and the cached user profile live under the fixed keys
//! [`TOKEN_KEY`] and [`USER_KEY`]. The sync core only needs them to decide
//! whether a realtime session can be started without logging in again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Map;

use crate::identity::Identity;

pub const TOKEN_KEY: &str = "@token";
pub const USER_KEY: &str = "@user";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to access credential file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("stored credentials are corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("could not determine the user data directory")]
    NoDataDir,
}

/// String key/value storage for persisted credentials.
pub trait CredentialStore: Send + Sync {
    /// # Errors
    ///
    /// Backend failures.
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    /// # Errors
    ///
    /// Backend failures.
    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    /// Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn remove(&self, key: &str) -> Result<(), CredentialError>;
}

/// A token plus the profile it was issued for.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub token: String,
    pub user: Identity,
}

/// The stored session, if both keys are present.
///
/// # Errors
///
/// [`CredentialError::Corrupt`] when `@user` is not a valid profile.
pub fn load_session(store: &dyn CredentialStore) -> Result<Option<StoredSession>, CredentialError> {
    let (Some(token), Some(user)) = (store.get(TOKEN_KEY)?, store.get(USER_KEY)?) else {
        return Ok(None);
    };
    let user: Identity = serde_json::from_str(&user)?;
    Ok(Some(StoredSession { token, user }))
}

/// # Errors
///
/// Backend failures.
pub fn save_session(
    store: &dyn CredentialStore,
    token: &str,
    user: &Identity,
) -> Result<(), CredentialError> {
    store.set(TOKEN_KEY, token)?;
    store.set(USER_KEY, &serde_json::to_string(user)?)?;
    tracing::debug!(user_id = %user.id, "session saved");
    Ok(())
}

/// Forget both keys, e.g. on logout or after a `401`.
///
/// # Errors
///
/// Backend failures.
pub fn clear_session(store: &dyn CredentialStore) -> Result<(), CredentialError> {
    store.remove(TOKEN_KEY)?;
    store.remove(USER_KEY)?;
    tracing::debug!("session cleared");
    Ok(())
}

/// Credentials kept in a JSON object file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: std::sync::Arc<Mutex<()>>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: std::sync::Arc::default(),
        }
    }

    /// `<data dir>/sitesync/credentials.json`.
    ///
    /// # Errors
    ///
    /// [`CredentialError::NoDataDir`] when the platform has no data dir.
    pub fn default_location() -> Result<Self, CredentialError> {
        let dir = dirs::data_dir().ok_or(CredentialError::NoDataDir)?;
        Ok(Self::new(dir.join("sitesync").join("credentials.json")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CredentialError {
        CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_map(&self) -> Result<Map<String, serde_json::Value>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(Map::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn write_map(&self, map: &Map<String, serde_json::Value>) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let contents = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, contents).map_err(|e| self.io_error(e))
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let _guard = self.lock.lock();
        Ok(self
            .read_map()?
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> Result<(), CredentialError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

/// In-memory store, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, String>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CredentialError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
