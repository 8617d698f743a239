//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `Session`: access token, refresh token and user profile
//! - `CredentialStore`: persisted-session storage (file, keychain, memory)
//! - `AuthManager`: sign-in/sign-up/sign-out and the session callbacks the
//!   token-refresh interceptor reports to

pub mod credentials;
pub mod manager;
pub mod session;

pub use credentials::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    StorageError, USER_STORAGE_KEY,
};
pub use manager::AuthManager;
pub use session::Session;
