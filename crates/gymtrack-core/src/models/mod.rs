//! Data models for the workout service.
//!
//! - `User`: profile attached to a session
//! - `Exercise`: catalog entry, browsed by muscle group
//! - `HistoryEntry`, `HistoryByDay`: completed exercises grouped per day

pub mod exercise;
pub mod history;
pub mod user;

pub use exercise::Exercise;
pub use history::{HistoryByDay, HistoryEntry};
pub use user::{ProfileUpdate, User};

use serde::{Deserialize, Deserializer};

/// Accept ids sent either as JSON numbers or strings.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}
