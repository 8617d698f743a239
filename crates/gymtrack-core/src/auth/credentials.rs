//! Persisted-session storage.
//!
//! The API client and auth manager only see the `CredentialStore` trait.
//! All backends keep a single serialized `Session` under one fixed key.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use keyring::Entry;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::Session;

/// Fixed key the serialized session lives under.
pub const USER_STORAGE_KEY: &str = "@gymtrack:user";

/// Keychain service name
const SERVICE_NAME: &str = "gymtrack";

/// Session file name in cache directory
const SESSION_FILE: &str = "user.json";

/// Suffix for the staging file a save writes before renaming it into place
const STAGING_SUFFIX: &str = "tmp";

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to access session storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored session is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Keychain task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save(&self, session: &Session) -> Result<(), StorageError>;

    /// Returns `None` when nothing is stored.
    async fn load(&self) -> Result<Option<Session>, StorageError>;

    async fn remove(&self) -> Result<(), StorageError>;
}

/// JSON file in the cache directory.
pub struct FileCredentialStore {
    cache_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    /// Unique per save, so concurrent saves never share a staging file.
    fn staging_path(&self) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.cache_dir.join(format!(
            "{}.{}.{}.{}",
            SESSION_FILE,
            std::process::id(),
            seq,
            STAGING_SUFFIX
        ))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let path = self.session_path();
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let contents = serde_json::to_string_pretty(session)?;

        // Readers see either the old record or the new one, never a partial write
        let staging = self.staging_path();
        if let Err(e) = tokio::fs::write(&staging, contents).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), "Session saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Session>, StorageError> {
        let path = self.session_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.session_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// OS keychain entry holding the serialized session.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Run a keychain call off the async executor; the platform APIs block.
    async fn with_entry<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, StorageError> + Send + 'static,
    {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || f(Entry::new(&service, USER_STORAGE_KEY)?)).await?
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let contents = serde_json::to_string(session)?;
        self.with_entry(move |entry| Ok(entry.set_password(&contents)?))
            .await
    }

    async fn load(&self) -> Result<Option<Session>, StorageError> {
        let contents = self
            .with_entry(|entry| match entry.get_password() {
                Ok(contents) => Ok(Some(contents)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e.into()),
            })
            .await?;

        match contents {
            Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self) -> Result<(), StorageError> {
        self.with_entry(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }
}

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    session: Mutex<Option<Session>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }

    /// Current contents without going through the async interface.
    pub fn snapshot(&self) -> Option<Session> {
        self.session.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        *self.session.lock() = Some(session.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Session>, StorageError> {
        Ok(self.session.lock().clone())
    }

    async fn remove(&self) -> Result<(), StorageError> {
        *self.session.lock() = None;
        Ok(())
    }
}
