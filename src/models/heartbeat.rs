use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single liveness pulse. Rows are append-only; the newest row per
/// worker name is the liveness signal, older rows are history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub id: i64,
    pub worker_name: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub current_job_id: Option<Uuid>,
}

/// Default status string written with each pulse.
pub const HEARTBEAT_ALIVE: &str = "ALIVE";
