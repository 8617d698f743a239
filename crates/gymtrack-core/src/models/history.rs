use serde::{Deserialize, Serialize};

use super::deserialize_id;

/// One completed exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    pub group: String,
    /// Time of day, already formatted by the service (`HH:MM`).
    pub hour: String,
    pub created_at: String,
}

/// History section as returned by `GET /history`, newest day first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryByDay {
    /// Day label, e.g. `26.01.23`.
    pub title: String,
    pub data: Vec<HistoryEntry>,
}

impl HistoryByDay {
    pub fn count_display(&self) -> String {
        match self.data.len() {
            1 => "1 exercise".to_string(),
            n => format!("{} exercises", n),
        }
    }
}
