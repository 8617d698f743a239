//! API client for the workout service.
//!
//! `ApiClient` is the single shared HTTP client of the app. It owns the
//! default `Authorization` header, the token-refresh state, and the list
//! of installed response interceptors. Clone is cheap: clones share all
//! of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use reqwest::header::{self, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::error::RequestFailure;
use super::interceptor::{
    InterceptorHandle, RefreshState, Registration, Registry, SessionCallbacks,
    TokenRefreshInterceptor,
};
use super::transport::bearer_value;
use super::{ApiError, ApiRequest, ApiResponse, ReqwestTransport, Transport};
use crate::auth::{CredentialStore, Session};
use crate::models::{Exercise, HistoryByDay, ProfileUpdate, User};

// ============================================================================
// Constants
// ============================================================================

/// Largest avatar the service accepts.
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

/// Why a request did not come back 2xx.
pub(crate) enum DispatchError {
    /// No response at all.
    Transport(ApiError),
    /// The server answered with an error status.
    Status(RequestFailure),
}

struct ClientInner {
    base_url: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    authorization: RwLock<Option<HeaderValue>>,
    refresh: Mutex<RefreshState>,
    /// Held across every load-modify-save of the stored session
    store_writes: tokio::sync::Mutex<()>,
    interceptors: Registry,
    next_interceptor_id: AtomicU64,
}

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a client talking HTTP through reqwest
    pub fn new(base_url: impl Into<String>, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(base_url, transport, store))
    }

    pub fn with_transport(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                transport,
                store,
                authorization: RwLock::new(None),
                refresh: Mutex::new(RefreshState::default()),
                store_writes: tokio::sync::Mutex::new(()),
                interceptors: Arc::new(RwLock::new(Vec::new())),
                next_interceptor_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Set the default bearer token sent with every request
    pub fn set_token(&self, token: &str) -> Result<(), ApiError> {
        let value = bearer_value(token)?;
        *self.inner.authorization.write() = Some(value);
        Ok(())
    }

    pub fn clear_token(&self) {
        *self.inner.authorization.write() = None;
    }

    /// Token currently sent by default, without the `Bearer ` prefix.
    pub fn token(&self) -> Option<String> {
        self.inner
            .authorization
            .read()
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    }

    pub(crate) fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Serializes read-modify-write updates of the stored session.
    pub(crate) async fn lock_store(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.store_writes.lock().await
    }

    pub(crate) fn refresh_state(&self) -> &Mutex<RefreshState> {
        &self.inner.refresh
    }

    /// True while a refresh-token exchange is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.lock().is_refreshing()
    }

    /// Requests parked until the in-flight exchange settles.
    pub fn pending_replays(&self) -> usize {
        self.inner.refresh.lock().pending()
    }

    // ===== Interceptors =====

    /// Install the token-refresh interceptor bound to `callbacks`.
    ///
    /// Each call installs a separate interceptor; detach the previous handle
    /// before registering again.
    pub fn register_token_manager(&self, callbacks: Arc<dyn SessionCallbacks>) -> InterceptorHandle {
        let id = self.inner.next_interceptor_id.fetch_add(1, Ordering::Relaxed);
        self.inner.interceptors.write().push(Registration {
            id,
            interceptor: Arc::new(TokenRefreshInterceptor::new(callbacks)),
        });
        debug!(id, "Token interceptor registered");
        InterceptorHandle::new(id, &self.inner.interceptors)
    }

    pub fn interceptor_count(&self) -> usize {
        self.inner.interceptors.read().len()
    }

    // ===== Request execution =====

    /// Send a request, letting the installed interceptor handle error
    /// responses. Without an interceptor, errors come back raw.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        match self.dispatch(request).await {
            Ok(response) => Ok(response),
            Err(DispatchError::Transport(err)) => Err(err),
            Err(DispatchError::Status(failure)) => {
                // First registration wins, later ones would only see its result
                let interceptor = self
                    .inner
                    .interceptors
                    .read()
                    .first()
                    .map(|r| r.interceptor.clone());
                match interceptor {
                    Some(interceptor) => interceptor.on_error(self, failure).await,
                    None => Err(failure.into_raw()),
                }
            }
        }
    }

    /// Re-issue a request as-is, bypassing interceptors.
    pub(crate) async fn replay(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        debug!(path = %request.path, "Replaying request");
        self.dispatch(request).await.map_err(|e| match e {
            DispatchError::Transport(err) => err,
            DispatchError::Status(failure) => failure.into_raw(),
        })
    }

    /// Bypass interceptors but still surface server messages.
    pub(crate) async fn send_unintercepted(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatch(request).await.map_err(|e| match e {
            DispatchError::Transport(err) => err,
            DispatchError::Status(failure) => failure.normalize(),
        })
    }

    async fn dispatch(&self, mut request: ApiRequest) -> Result<ApiResponse, DispatchError> {
        if !request.headers.contains_key(header::AUTHORIZATION) {
            let default = self.inner.authorization.read().clone();
            if let Some(value) = default {
                request.headers.insert(header::AUTHORIZATION, value);
            }
        }

        let response = self
            .inner
            .transport
            .send(&self.inner.base_url, &request)
            .await
            .map_err(DispatchError::Transport)?;

        if response.is_success() {
            Ok(response)
        } else {
            debug!(path = %request.path, status = %response.status, "Request failed");
            Err(DispatchError::Status(RequestFailure {
                request,
                status: response.status,
                body: response.body,
            }))
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    // ===== Sessions & users =====

    /// Exchange credentials for a session
    pub async fn create_session(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let request = ApiRequest::post("/sessions")
            .json(serde_json::json!({ "email": email, "password": password }));
        let session: Session = self.execute(request).await?.json()?;
        info!(user = %session.user.id, "Signed in");
        Ok(session)
    }

    pub async fn create_user(&self, name: &str, email: &str, password: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post("/users").json(serde_json::json!({
            "name": name,
            "email": email,
            "password": password,
        }));
        self.execute(request).await?;
        Ok(())
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ApiError> {
        let form = serde_json::to_value(update)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode profile: {}", e)))?;
        // The service reads the form nested under `data`
        let request = ApiRequest::put("/users").json(serde_json::json!({ "data": form }));
        self.execute(request).await?;
        Ok(())
    }

    /// Upload a new avatar image and return the updated user
    pub async fn upload_avatar(&self, file_name: &str, bytes: Vec<u8>) -> Result<User, ApiError> {
        if bytes.len() > MAX_AVATAR_BYTES {
            return Err(ApiError::App(
                "This image is too large. Choose an image up to 5MB".to_string(),
            ));
        }

        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let request = ApiRequest::patch("/users/avatar").file(
            "avatar",
            file_name.to_ascii_lowercase(),
            format!("image/{}", extension),
            bytes,
        );
        self.execute(request).await?.json()
    }

    // ===== Exercises & history =====

    /// Muscle groups, in the order the service lists them
    pub async fn fetch_groups(&self) -> Result<Vec<String>, ApiError> {
        self.get("/groups").await
    }

    pub async fn fetch_exercises_by_group(&self, group: &str) -> Result<Vec<Exercise>, ApiError> {
        self.get(&format!("/exercises/bygroup/{}", group)).await
    }

    pub async fn fetch_exercise(&self, id: &str) -> Result<Exercise, ApiError> {
        self.get(&format!("/exercises/{}", id)).await
    }

    /// Record an exercise as done now
    pub async fn register_history(&self, exercise_id: &str) -> Result<(), ApiError> {
        let request =
            ApiRequest::post("/history").json(serde_json::json!({ "exercise_id": exercise_id }));
        self.execute(request).await?;
        Ok(())
    }

    pub async fn fetch_history(&self) -> Result<Vec<HistoryByDay>, ApiError> {
        self.get("/history").await
    }

    // ===== Asset URLs =====

    pub fn exercise_demo_url(&self, exercise: &Exercise) -> String {
        format!("{}/exercise/demo/{}", self.inner.base_url, exercise.demo)
    }

    pub fn exercise_thumb_url(&self, exercise: &Exercise) -> String {
        format!("{}/exercise/thumb/{}", self.inner.base_url, exercise.thumb)
    }

    pub fn avatar_url(&self, user: &User) -> Option<String> {
        user.avatar
            .as_ref()
            .map(|avatar| format!("{}/avatar/{}", self.inner.base_url, avatar))
    }
}
