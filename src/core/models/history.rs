use serde::{Deserialize, Serialize};

use super::Record;

/// Append-only log of episode status moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistory {
    pub id: i64,
    pub episode_id: i64,
    #[serde(default)]
    pub old_status: Option<String>,
    pub new_status: String,
    #[serde(default)]
    pub changed_by: Option<String>,
    #[serde(default)]
    pub change_reason: Option<String>,
    #[serde(default)]
    pub changed_at: Option<String>,
}

impl Record for StatusHistory {
    fn key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStatusHistory {
    pub episode_id: i64,
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_by: Option<String>,
    pub change_reason: Option<String>,
}
