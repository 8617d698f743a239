use serde::{Deserialize, Serialize};

use super::deserialize_id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    pub series: u32,
    pub repetitions: u32,
    pub group: String,
    /// Demo animation file name, served under `/exercise/demo/`.
    pub demo: String,
    /// Thumbnail file name, served under `/exercise/thumb/`.
    pub thumb: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Exercise {
    pub fn display_sets(&self) -> String {
        format!("{} sets x {} reps", self.series, self.repetitions)
    }
}
