//! Signed-in user state.
//!
//! `AuthManager` signs users in and out, restores the stored session at
//! startup, and is what the token-refresh interceptor reports back to.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::Session;
use crate::api::{ApiClient, ApiError, InterceptorHandle, SessionCallbacks};
use crate::models::User;

/// Shown when sign-in fails without a message from the server.
const SIGN_IN_FALLBACK_MESSAGE: &str = "Unable to sign in. Please try again later.";

/// State shared with the interceptor through `SessionCallbacks`.
struct AuthState {
    client: ApiClient,
    user: RwLock<Option<User>>,
    refreshed_token: watch::Sender<Option<String>>,
}

impl AuthState {
    async fn clear(&self) {
        *self.user.write() = None;
        self.client.clear_token();
        if let Err(e) = self.client.store().remove().await {
            warn!(error = %e, "Failed to remove stored session");
        }
        info!("Signed out");
    }
}

#[async_trait]
impl SessionCallbacks for AuthState {
    async fn sign_out(&self) {
        self.clear().await;
    }

    fn on_token_refreshed(&self, token: &str) {
        self.refreshed_token.send_replace(Some(token.to_string()));
    }
}

pub struct AuthManager {
    state: Arc<AuthState>,
    registration: Mutex<Option<InterceptorHandle>>,
}

impl AuthManager {
    pub fn new(client: ApiClient) -> Self {
        let (refreshed_token, _) = watch::channel(None);
        Self {
            state: Arc::new(AuthState {
                client,
                user: RwLock::new(None),
                refreshed_token,
            }),
            registration: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.state.client
    }

    /// Install the token-refresh interceptor, replacing any earlier
    /// registration made through this manager.
    pub fn attach(&self) {
        let mut registration = self.registration.lock();
        if let Some(previous) = registration.take() {
            previous.detach();
        }
        let callbacks: Arc<dyn SessionCallbacks> = self.state.clone();
        *registration = Some(self.state.client.register_token_manager(callbacks));
    }

    pub fn detach(&self) {
        if let Some(handle) = self.registration.lock().take() {
            handle.detach();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.registration.lock().is_some()
    }

    pub fn user(&self) -> Option<User> {
        self.state.user.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.state.user.read().is_some()
    }

    /// Last token delivered by a refresh, if any happened.
    pub fn refreshed_token(&self) -> Option<String> {
        self.state.refreshed_token.borrow().clone()
    }

    pub fn subscribe_token(&self) -> watch::Receiver<Option<String>> {
        self.state.refreshed_token.subscribe()
    }

    /// Restore the stored session, if any, and make its token current.
    pub async fn load_user_data(&self) -> Result<Option<User>, ApiError> {
        let Some(session) = self.state.client.store().load().await? else {
            debug!("No stored session");
            return Ok(None);
        };

        self.state.client.set_token(&session.token)?;
        *self.state.user.write() = Some(session.user.clone());
        debug!(user = %session.user.id, "Stored session restored");
        Ok(Some(session.user))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, ApiError> {
        self.try_sign_in(email, password).await.map_err(|e| match e {
            ApiError::App(message) => ApiError::App(message),
            other => {
                warn!(error = %other, "Sign-in failed");
                ApiError::App(SIGN_IN_FALLBACK_MESSAGE.to_string())
            }
        })
    }

    async fn try_sign_in(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let session = self.state.client.create_session(email, password).await?;
        self.make_current(&session).await?;
        Ok(session.user)
    }

    /// Create the account, then sign in with it.
    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<User, ApiError> {
        self.state.client.create_user(name, email, password).await?;
        info!(email = %email, "Account created");
        self.sign_in(email, password).await
    }

    pub async fn sign_out(&self) {
        self.state.clear().await;
    }

    /// Apply profile changes to the stored session and the current user.
    pub async fn update_user_profile(
        &self,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<(), ApiError> {
        let store = self.state.client.store();
        let _writes = self.state.client.lock_store().await;
        let Some(mut session) = store.load().await? else {
            return Ok(());
        };

        if let Some(name) = name {
            session.user.name = name.to_string();
        }
        if let Some(avatar) = avatar {
            session.user.avatar = Some(avatar.to_string());
        }

        *self.state.user.write() = Some(session.user.clone());
        store.save(&session).await?;
        Ok(())
    }

    async fn make_current(&self, session: &Session) -> Result<(), ApiError> {
        self.state.client.store().save(session).await?;
        *self.state.user.write() = Some(session.user.clone());
        self.state.client.set_token(&session.token)?;
        Ok(())
    }
}

impl Drop for AuthManager {
    fn drop(&mut self) {
        // The interceptor holds our state; don't leave it installed
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiRequest, ApiResponse, REFRESH_TOKEN_PATH};
    use crate::auth::{CredentialStore, MemoryCredentialStore};
    use crate::test_support::{
        error_json, ok_json, recoverable_401, session, wait_until, GatedStore, ScriptedTransport,
    };
    use reqwest::StatusCode;

    fn sign_in_body() -> serde_json::Value {
        serde_json::json!({
            "token": "T1",
            "refresh_token": "R1",
            "user": { "id": 1, "name": "Ana", "email": "ana@example.com" }
        })
    }

    fn manager(
        transport: Arc<ScriptedTransport>,
        store: Arc<dyn CredentialStore>,
    ) -> AuthManager {
        AuthManager::new(ApiClient::with_transport("http://gym.test", transport, store))
    }

    #[tokio::test]
    async fn test_sign_in_persists_session_and_sets_token() {
        let transport = Arc::new(ScriptedTransport::new(|_| ok_json(sign_in_body())));
        let store = Arc::new(MemoryCredentialStore::new());
        let auth = manager(transport, store.clone());

        let user = auth.sign_in("ana@example.com", "123456").await.unwrap();

        assert_eq!(user.name, "Ana");
        assert!(auth.is_signed_in());
        assert_eq!(auth.client().token().as_deref(), Some("T1"));
        assert_eq!(store.snapshot(), Some(session("T1", "R1")));
    }

    #[tokio::test]
    async fn test_sign_in_keeps_server_message() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            error_json(StatusCode::UNAUTHORIZED, "E-mail e/ou senha incorreta.")
        }));
        let auth = manager(transport, Arc::new(MemoryCredentialStore::new()));
        auth.attach();

        let err = auth.sign_in("ana@example.com", "wrong").await.unwrap_err();
        assert_eq!(err, ApiError::App("E-mail e/ou senha incorreta.".to_string()));
        assert!(!auth.is_signed_in());
    }

    #[tokio::test]
    async fn test_sign_in_falls_back_to_generic_message() {
        let transport = Arc::new(ScriptedTransport::failing(ApiError::NetworkError(
            "dns error".to_string(),
        )));
        let auth = manager(transport, Arc::new(MemoryCredentialStore::new()));

        let err = auth.sign_in("ana@example.com", "123456").await.unwrap_err();
        assert_eq!(err, ApiError::App(SIGN_IN_FALLBACK_MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_in() {
        let transport = Arc::new(ScriptedTransport::new(|request| match request.path.as_str() {
            "/users" => ApiResponse::new(StatusCode::CREATED, ""),
            _ => ok_json(sign_in_body()),
        }));
        let store = Arc::new(MemoryCredentialStore::new());
        let auth = manager(transport.clone(), store.clone());

        auth.sign_up("Ana", "ana@example.com", "123456").await.unwrap();

        let paths: Vec<_> = transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/users", "/sessions"]);
        assert!(store.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_load_and_sign_out() {
        let transport = Arc::new(ScriptedTransport::new(|_| ok_json(serde_json::json!({}))));
        let store = Arc::new(MemoryCredentialStore::with_session(session("T1", "R1")));
        let auth = manager(transport, store.clone());

        let user = auth.load_user_data().await.unwrap();
        assert_eq!(user.map(|u| u.name), Some("Ana".to_string()));
        assert_eq!(auth.client().token().as_deref(), Some("T1"));

        auth.sign_out().await;
        assert!(!auth.is_signed_in());
        assert!(auth.client().token().is_none());
        assert!(store.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_load_without_session() {
        let transport = Arc::new(ScriptedTransport::new(|_| ok_json(serde_json::json!({}))));
        let auth = manager(transport, Arc::new(MemoryCredentialStore::new()));

        assert!(auth.load_user_data().await.unwrap().is_none());
        assert!(auth.client().token().is_none());
    }

    #[tokio::test]
    async fn test_update_user_profile() {
        let transport = Arc::new(ScriptedTransport::new(|_| ok_json(serde_json::json!({}))));
        let store = Arc::new(MemoryCredentialStore::with_session(session("T1", "R1")));
        let auth = manager(transport, store.clone());

        auth.update_user_profile(Some("Ana Souza"), None).await.unwrap();
        auth.update_user_profile(None, Some("ana.png")).await.unwrap();

        let stored = store.snapshot().unwrap();
        assert_eq!(stored.user.name, "Ana Souza");
        assert_eq!(stored.user.avatar.as_deref(), Some("ana.png"));
        assert_eq!(stored.token, "T1");
        assert_eq!(auth.user(), Some(stored.user));
    }

    #[tokio::test]
    async fn test_profile_update_during_refresh_keeps_new_tokens() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            if request.path == REFRESH_TOKEN_PATH {
                return ok_json(serde_json::json!({ "token": "T2", "refreshToken": "R2" }));
            }
            match request.authorization() {
                Some("Bearer T2") => ok_json(serde_json::json!({})),
                _ => recoverable_401("token.expired"),
            }
        }));
        let store = Arc::new(GatedStore::with_session(session("T1", "R1")));
        let auth = manager(transport, store.clone());
        auth.load_user_data().await.unwrap();
        auth.attach();

        let update = async {
            wait_until(|| store.saves_started() == 1).await;
            auth.update_user_profile(Some("Ana Souza"), None).await
        };
        let release = async {
            wait_until(|| store.saves_started() == 1).await;
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            store.open();
        };
        let (request, update, ()) = tokio::join!(
            auth.client().execute(ApiRequest::get("/history")),
            update,
            release,
        );
        request.unwrap();
        update.unwrap();

        let stored = store.snapshot().unwrap();
        assert_eq!(stored.token, "T2");
        assert_eq!(stored.refresh_token, "R2");
        assert_eq!(stored.user.name, "Ana Souza");
    }

    #[tokio::test]
    async fn test_attach_replaces_previous_registration() {
        let transport = Arc::new(ScriptedTransport::new(|_| ok_json(serde_json::json!({}))));
        let auth = manager(transport, Arc::new(MemoryCredentialStore::new()));

        auth.attach();
        auth.attach();
        assert_eq!(auth.client().interceptor_count(), 1);

        auth.detach();
        assert_eq!(auth.client().interceptor_count(), 0);
        assert!(!auth.is_attached());
    }

    #[tokio::test]
    async fn test_drop_detaches() {
        let transport = Arc::new(ScriptedTransport::new(|_| ok_json(serde_json::json!({}))));
        let client = ApiClient::with_transport(
            "http://gym.test",
            transport,
            Arc::new(MemoryCredentialStore::new()),
        );

        let auth = AuthManager::new(client.clone());
        auth.attach();
        assert_eq!(client.interceptor_count(), 1);

        drop(auth);
        assert_eq!(client.interceptor_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_publishes_token() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            if request.path == REFRESH_TOKEN_PATH {
                return ok_json(serde_json::json!({ "token": "T2", "refreshToken": "R2" }));
            }
            match request.authorization() {
                Some("Bearer T2") => ok_json(serde_json::json!(["costas"])),
                _ => recoverable_401("token.expired"),
            }
        }));
        let store = Arc::new(MemoryCredentialStore::with_session(session("T1", "R1")));
        let auth = manager(transport, store.clone());
        auth.load_user_data().await.unwrap();
        auth.attach();

        let mut tokens = auth.subscribe_token();
        let groups = auth.client().fetch_groups().await.unwrap();

        assert_eq!(groups, vec!["costas"]);
        assert!(tokens.has_changed().unwrap());
        assert_eq!(tokens.borrow_and_update().as_deref(), Some("T2"));
        assert_eq!(auth.refreshed_token().as_deref(), Some("T2"));
        assert!(auth.is_signed_in());
        assert_eq!(store.snapshot().unwrap().token, "T2");
    }

    #[tokio::test]
    async fn test_failed_refresh_signs_user_out() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            if request.path == REFRESH_TOKEN_PATH {
                return error_json(StatusCode::UNAUTHORIZED, "token.invalid");
            }
            recoverable_401("token.expired")
        }));
        let store = Arc::new(MemoryCredentialStore::with_session(session("T1", "R1")));
        let auth = manager(transport, store.clone());
        auth.load_user_data().await.unwrap();
        auth.attach();

        let err = auth
            .client()
            .execute(ApiRequest::get("/history"))
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::App("token.invalid".to_string()));
        assert!(!auth.is_signed_in());
        assert!(store.snapshot().is_none());
        assert!(auth.client().token().is_none());
        assert!(auth.refreshed_token().is_none());
    }
}
