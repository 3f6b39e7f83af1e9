use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a single workflow step.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failed,
    Running,
}

/// One persisted step record in a job's append-only trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub id: i64,
    pub job_id: Uuid,
    pub step_name: String,
    pub step_number: Option<i32>,
    pub action: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Payload for appending a step record; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewJobLog {
    pub step_name: String,
    pub step_number: Option<i32>,
    pub action: String,
    pub status: StepStatus,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewJobLog {
    pub fn new(step_name: &str, action: &str, status: StepStatus) -> Self {
        Self {
            step_name: step_name.to_string(),
            step_number: None,
            action: action.to_string(),
            status,
            duration_ms: None,
            error_message: None,
            metadata: None,
        }
    }
}
