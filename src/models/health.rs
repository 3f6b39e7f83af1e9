use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted resource/queue snapshot. Write-only telemetry; never consulted
/// by the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub cpu_usage_percent: Option<f64>,
    pub ram_usage_percent: Option<f64>,
    pub disk_usage_percent: Option<f64>,
    pub queue_size: i64,
    pub active_jobs: i64,
    pub pending_jobs: i64,
    pub worker_status: String,
}

/// Payload for one snapshot; the store assigns id and timestamp.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub cpu_usage_percent: Option<f64>,
    pub ram_usage_percent: Option<f64>,
    pub disk_usage_percent: Option<f64>,
    pub queue_size: i64,
    pub active_jobs: i64,
    pub pending_jobs: i64,
    pub worker_status: String,
}

pub const WORKER_ONLINE: &str = "ONLINE";
pub const WORKER_OFFLINE: &str = "OFFLINE";
