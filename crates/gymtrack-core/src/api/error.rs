use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use super::ApiRequest;
use crate::auth::StorageError;

/// Errors surfaced by `ApiClient` calls.
///
/// Cloneable so that a single refresh-exchange failure can be delivered to
/// every request that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Server-supplied message, ready to show to the user.
    #[error("{0}")]
    App(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Token refresh was abandoned before it completed")]
    RefreshAborted,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error payload the service attaches to non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub(crate) fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the error carries a message meant for the user.
    pub fn is_app_error(&self) -> bool {
        matches!(self, ApiError::App(_))
    }
}

/// A request the server answered with a non-2xx status.
#[derive(Debug, Clone)]
pub(crate) struct RequestFailure {
    pub request: ApiRequest,
    pub status: StatusCode,
    pub body: Bytes,
}

impl RequestFailure {
    pub(crate) fn message(&self) -> Option<String> {
        ErrorBody::parse(&self.body).message
    }

    /// The status-mapped error, with no interpretation of the body.
    pub(crate) fn into_raw(self) -> ApiError {
        ApiError::from_status(self.status, &String::from_utf8_lossy(&self.body))
    }

    /// `ApiError::App` when the server sent a message, raw otherwise.
    pub(crate) fn normalize(self) -> ApiError {
        match self.message() {
            Some(message) => ApiError::App(message),
            None => self.into_raw(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::NetworkError(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err.to_string())
    }
}
