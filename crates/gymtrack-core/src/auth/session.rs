use serde::{Deserialize, Serialize};

use crate::models::User;

/// Signed-in session as returned by `POST /sessions` and persisted by the
/// credential store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: String,
    pub user: User,
}

impl Session {
    /// Same user, new credentials.
    pub fn with_tokens(&self, token: String, refresh_token: String) -> Self {
        Self {
            token,
            refresh_token,
            user: self.user.clone(),
        }
    }
}

/// Body of a successful `POST /sessions/refresh-token`.
#[derive(Debug, Deserialize)]
pub(crate) struct RefreshedTokens {
    pub token: String,
    /// Some deployments rotate the refresh token, some don't.
    #[serde(rename = "refreshToken", alias = "refresh_token", default)]
    pub refresh_token: Option<String>,
}
