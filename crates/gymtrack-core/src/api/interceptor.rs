//! Response interceptor that recovers from expired access tokens.
//!
//! When a request fails with a 401 whose message is `token.expired` or
//! `token.invalid`, the interceptor exchanges the stored refresh token for
//! a new access token and replays the request. Only one exchange runs at a
//! time: requests failing while it is in flight are parked in a FIFO queue
//! and replayed, in order, once it settles.
//!
//! ```text
//! Idle -> Refreshing -> (success: drain + replay) | (failure: drain + reject) -> Idle
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::error::RequestFailure;
use super::{ApiClient, ApiError, ApiRequest, ApiResponse};
use crate::auth::session::RefreshedTokens;
use crate::auth::Session;

/// Refresh endpoint, relative to the base URL.
pub const REFRESH_TOKEN_PATH: &str = "/sessions/refresh-token";

/// 401 messages that mean "get a new token", as opposed to a real denial.
const RECOVERABLE_CODES: [&str; 2] = ["token.expired", "token.invalid"];

/// Hooks the interceptor calls back into.
#[async_trait]
pub trait SessionCallbacks: Send + Sync {
    /// Clear session state and the credential store.
    async fn sign_out(&self);

    /// A new access token is active.
    fn on_token_refreshed(&self, token: &str);
}

type Continuation = oneshot::Sender<Result<String, ApiError>>;

/// Refresh flag and the requests waiting on it.
#[derive(Default)]
pub(crate) struct RefreshState {
    refreshing: bool,
    queue: VecDeque<Continuation>,
}

/// What a recoverable 401 gets when it asks to refresh.
enum Slot {
    /// Nobody is refreshing; the caller runs the exchange.
    Leader,
    /// An exchange is in flight; wait for its outcome.
    Waiter(oneshot::Receiver<Result<String, ApiError>>),
}

impl RefreshState {
    fn acquire(&mut self) -> Slot {
        if self.refreshing {
            let (tx, rx) = oneshot::channel();
            self.queue.push_back(tx);
            Slot::Waiter(rx)
        } else {
            self.refreshing = true;
            Slot::Leader
        }
    }

    /// Leave the refresh window, handing back the queue in arrival order.
    fn release(&mut self) -> VecDeque<Continuation> {
        self.refreshing = false;
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Clears the refresh flag exactly once, however the exchange ends.
///
/// If the leader's future is dropped mid-exchange, waiters are rejected
/// with `RefreshAborted` instead of hanging.
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl<'a> RefreshGuard<'a> {
    fn new(state: &'a Mutex<RefreshState>) -> Self {
        Self {
            state,
            settled: false,
        }
    }

    fn settle(mut self, outcome: Result<String, ApiError>) {
        self.settled = true;
        Self::drain(self.state, outcome);
    }

    fn drain(state: &Mutex<RefreshState>, outcome: Result<String, ApiError>) {
        // Lock is released before any waiter runs
        let queue = state.lock().release();
        if !queue.is_empty() {
            debug!(waiting = queue.len(), ok = outcome.is_ok(), "Settling queued requests");
        }
        for continuation in queue {
            // Receiver gone means that caller stopped waiting
            let _ = continuation.send(outcome.clone());
        }
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Token refresh dropped before completion");
            Self::drain(self.state, Err(ApiError::RefreshAborted));
        }
    }
}

pub(crate) struct TokenRefreshInterceptor {
    callbacks: Arc<dyn SessionCallbacks>,
}

impl TokenRefreshInterceptor {
    pub(crate) fn new(callbacks: Arc<dyn SessionCallbacks>) -> Self {
        Self { callbacks }
    }

    /// Handle a non-2xx response. Always ends in a replayed response or an
    /// explicit error.
    pub(crate) async fn on_error(
        &self,
        client: &ApiClient,
        failure: RequestFailure,
    ) -> Result<ApiResponse, ApiError> {
        if failure.status == StatusCode::UNAUTHORIZED {
            let message = failure.message();
            if message
                .as_deref()
                .is_some_and(|m| RECOVERABLE_CODES.contains(&m))
            {
                return self.recover(client, failure).await;
            }

            warn!(path = %failure.request.path, message = ?message, "Unrecoverable authorization failure, signing out");
            self.callbacks.sign_out().await;
        }

        Err(failure.normalize())
    }

    async fn recover(
        &self,
        client: &ApiClient,
        failure: RequestFailure,
    ) -> Result<ApiResponse, ApiError> {
        let session = match client.store().load().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(path = %failure.request.path, "Token rejected and no stored session, signing out");
                self.callbacks.sign_out().await;
                return Err(failure.into_raw());
            }
            Err(e) => {
                warn!(error = %e, "Could not read stored session, signing out");
                self.callbacks.sign_out().await;
                return Err(e.into());
            }
        };

        let mut request = failure.request;
        let slot = client.refresh_state().lock().acquire();

        match slot {
            Slot::Waiter(rx) => {
                debug!(path = %request.path, "Refresh in flight, queuing request");
                let token = rx.await.unwrap_or(Err(ApiError::RefreshAborted))?;
                request.set_bearer(&token)?;
                client.replay(request).await
            }
            Slot::Leader => {
                let guard = RefreshGuard::new(client.refresh_state());
                match self.exchange(client, session).await {
                    Ok(token) => {
                        self.callbacks.on_token_refreshed(&token);
                        guard.settle(Ok(token.clone()));
                        request.set_bearer(&token)?;
                        client.replay(request).await
                    }
                    Err(err) => {
                        warn!(error = %err, "Token refresh failed, signing out");
                        guard.settle(Err(err.clone()));
                        self.callbacks.sign_out().await;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Trade the stored refresh token for a new session and make it current.
    async fn exchange(&self, client: &ApiClient, session: Session) -> Result<String, ApiError> {
        let request = ApiRequest::post(REFRESH_TOKEN_PATH)
            .json(serde_json::json!({ "token": session.refresh_token }));

        let response = client.send_unintercepted(request).await?;
        let refreshed: RefreshedTokens = response.json()?;

        // Re-read under the write lock so a concurrent profile update survives
        let _writes = client.lock_store().await;
        let current = client.store().load().await?.unwrap_or(session);
        let refresh_token = refreshed
            .refresh_token
            .unwrap_or_else(|| current.refresh_token.clone());
        let updated = current.with_tokens(refreshed.token.clone(), refresh_token);

        client.store().save(&updated).await?;
        client.set_token(&updated.token)?;
        info!(user = %updated.user.id, "Access token refreshed");

        Ok(updated.token)
    }
}

/// One installed interceptor.
pub(crate) struct Registration {
    pub id: u64,
    pub interceptor: Arc<TokenRefreshInterceptor>,
}

pub(crate) type Registry = Arc<RwLock<Vec<Registration>>>;

/// Returned by `ApiClient::register_token_manager`.
///
/// Dropping the handle leaves the interceptor installed; call `detach`.
#[derive(Debug)]
pub struct InterceptorHandle {
    id: u64,
    registry: Weak<RwLock<Vec<Registration>>>,
}

impl InterceptorHandle {
    pub(crate) fn new(id: u64, registry: &Registry) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Remove this registration. Calling it again is a no-op.
    pub fn detach(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registrations = registry.write();
            let before = registrations.len();
            registrations.retain(|r| r.id != self.id);
            if registrations.len() != before {
                debug!(id = self.id, "Token interceptor detached");
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}
