use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// System-wide error record, optionally correlated to a job. Step-level
/// failures belong in the job's log trail instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLog {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub component: Option<String>,
    pub job_id: Option<Uuid>,
    pub message: String,
    pub detail: Option<String>,
}
