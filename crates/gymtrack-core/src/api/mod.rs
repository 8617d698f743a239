//! REST API client module for the workout service.
//!
//! This module provides the `ApiClient` for talking to the service and
//! the token-refresh interceptor that keeps its bearer token current.
//!
//! The API uses JWT bearer tokens obtained from `POST /sessions`; expired
//! tokens are exchanged through `POST /sessions/refresh-token`.

pub mod client;
pub mod error;
pub mod interceptor;
pub mod transport;

pub use client::{ApiClient, MAX_AVATAR_BYTES};
pub use error::ApiError;
pub use interceptor::{InterceptorHandle, SessionCallbacks, REFRESH_TOKEN_PATH};
pub use transport::{ApiRequest, ApiResponse, RequestBody, ReqwestTransport, Transport};
