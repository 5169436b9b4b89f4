use agent_contract::Task;
use serde::{Deserialize, Serialize};

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordType {
    Task,
}

/// On-disk envelope for one persisted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoredSession {
    #[serde(rename = "type")]
    pub record_type: SessionRecordType,
    pub version: u32,
    pub session_key: String,
    pub saved_at: String,
    pub task: Task,
}

impl StoredSession {
    #[must_use]
    pub fn v1(session_key: impl Into<String>, saved_at: impl Into<String>, task: Task) -> Self {
        Self {
            record_type: SessionRecordType::Task,
            version: STORE_VERSION,
            session_key: session_key.into(),
            saved_at: saved_at.into(),
            task,
        }
    }
}
