//! Shared fixtures for unit tests: a scripted transport standing in for
//! the service, and callbacks that record what they were asked to do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::{Notify, Semaphore};

use crate::api::interceptor::REFRESH_TOKEN_PATH;
use crate::api::{ApiError, ApiRequest, ApiResponse, SessionCallbacks, Transport};
use crate::auth::{CredentialStore, MemoryCredentialStore, Session, StorageError};
use crate::models::User;

type Handler = Box<dyn Fn(&ApiRequest) -> ApiResponse + Send + Sync>;

enum Behavior {
    Respond(Handler),
    Fail(ApiError),
}

/// Answers every request from a closure and keeps a log of what was sent.
pub(crate) struct ScriptedTransport {
    behavior: Behavior,
    log: Mutex<Vec<ApiRequest>>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(handler: impl Fn(&ApiRequest) -> ApiResponse + Send + Sync + 'static) -> Self {
        Self {
            behavior: Behavior::Respond(Box::new(handler)),
            log: Mutex::new(Vec::new()),
            refresh_gate: Mutex::new(None),
        }
    }

    /// Every request fails before reaching a server.
    pub(crate) fn failing(error: ApiError) -> Self {
        Self {
            behavior: Behavior::Fail(error),
            log: Mutex::new(Vec::new()),
            refresh_gate: Mutex::new(None),
        }
    }

    /// Hold refresh-endpoint calls until the returned `Notify` fires.
    pub(crate) fn gate_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.refresh_gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().clone()
    }

    pub(crate) fn count_path(&self, path: &str) -> usize {
        self.log.lock().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _base_url: &str, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.log.lock().push(request.clone());

        let gate = if request.path == REFRESH_TOKEN_PATH {
            self.refresh_gate.lock().clone()
        } else {
            None
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        // Every network call is a suspension point
        tokio::task::yield_now().await;

        match &self.behavior {
            Behavior::Respond(handler) => Ok(handler(request)),
            Behavior::Fail(error) => Err(error.clone()),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingCallbacks {
    sign_outs: AtomicUsize,
    refreshed: Mutex<Vec<String>>,
}

impl RecordingCallbacks {
    pub(crate) fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    pub(crate) fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().clone()
    }
}

#[async_trait]
impl SessionCallbacks for RecordingCallbacks {
    async fn sign_out(&self) {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
    }

    fn on_token_refreshed(&self, token: &str) {
        self.refreshed.lock().push(token.to_string());
    }
}

/// A store that cannot be read.
pub(crate) struct UnreadableStore;

#[async_trait]
impl CredentialStore for UnreadableStore {
    async fn save(&self, _session: &Session) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load(&self) -> Result<Option<Session>, StorageError> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "keychain locked").into())
    }

    async fn remove(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Memory store whose saves park until `open` is called.
pub(crate) struct GatedStore {
    inner: MemoryCredentialStore,
    gate: Semaphore,
    saves_started: AtomicUsize,
}

impl GatedStore {
    pub(crate) fn with_session(session: Session) -> Self {
        Self {
            inner: MemoryCredentialStore::with_session(session),
            gate: Semaphore::new(0),
            saves_started: AtomicUsize::new(0),
        }
    }

    /// Let every pending and future save through.
    pub(crate) fn open(&self) {
        self.gate.add_permits(1);
    }

    pub(crate) fn saves_started(&self) -> usize {
        self.saves_started.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> Option<Session> {
        self.inner.snapshot()
    }
}

#[async_trait]
impl CredentialStore for GatedStore {
    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        self.saves_started.fetch_add(1, Ordering::SeqCst);
        // The permit goes back on drop, so one `open` releases everyone
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| std::io::Error::other(e))?;
        self.inner.save(session).await
    }

    async fn load(&self) -> Result<Option<Session>, StorageError> {
        self.inner.load().await
    }

    async fn remove(&self) -> Result<(), StorageError> {
        self.inner.remove().await
    }
}

pub(crate) fn ok_json(value: serde_json::Value) -> ApiResponse {
    ApiResponse::new(StatusCode::OK, value.to_string())
}

pub(crate) fn error_json(status: StatusCode, message: &str) -> ApiResponse {
    ApiResponse::new(
        status,
        serde_json::json!({ "status": "error", "message": message }).to_string(),
    )
}

pub(crate) fn recoverable_401(code: &str) -> ApiResponse {
    error_json(StatusCode::UNAUTHORIZED, code)
}

pub(crate) fn user() -> User {
    User {
        id: "1".to_string(),
        name: "Ana".to_string(),
        email: "ana@example.com".to_string(),
        avatar: None,
    }
}

pub(crate) fn session(token: &str, refresh_token: &str) -> Session {
    Session {
        token: token.to_string(),
        refresh_token: refresh_token.to_string(),
        user: user(),
    }
}

/// Yield to other tasks until `condition` holds.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
