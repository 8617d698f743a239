//! gymtrack-core - API client, token refresh, auth and models for the
//! gymtrack workout service.
//!
//! The entry point is [`api::ApiClient`]; pair it with an
//! [`auth::AuthManager`] so expired access tokens are refreshed
//! transparently and unrecoverable ones sign the user out.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthManager, CredentialStore, Session};
pub use config::{Config, CredentialBackend};
