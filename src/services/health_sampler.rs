use sqlx::SqlitePool;
use sysinfo::{Disks, System};

use crate::db::{queries, StoreError};
use crate::models::health::{HealthSnapshot, WORKER_OFFLINE, WORKER_ONLINE};
use crate::models::job::JobStatus;
use crate::services::heartbeat::HeartbeatMonitor;

/// Periodically persists a resource/queue snapshot and refreshes the queue
/// gauges. Telemetry only; nothing here feeds back into scheduling.
pub struct HealthSampler {
    pool: SqlitePool,
    monitor: HeartbeatMonitor,
    worker_name: String,
    system: System,
}

impl HealthSampler {
    pub fn new(pool: SqlitePool, monitor: HeartbeatMonitor, worker_name: String) -> Self {
        Self { pool, monitor, worker_name, system: System::new_all() }
    }

    /// Take one snapshot, persist it, and update the gauges.
    ///
    /// CPU usage is measured across refreshes, so the first sample after
    /// startup reads low; the steady state is what matters here.
    pub async fn sample_once(&mut self) -> Result<HealthSnapshot, StoreError> {
        self.system.refresh_all();

        let pending = queries::count_jobs_by_status(&self.pool, JobStatus::Pending).await?;
        let retry = queries::count_jobs_by_status(&self.pool, JobStatus::Retry).await?;
        let recovered =
            queries::count_jobs_by_status(&self.pool, JobStatus::FailedRecovered).await?;
        let active = queries::count_jobs_by_status(&self.pool, JobStatus::Running).await?;

        let alive = self
            .monitor
            .worker_alive(&self.worker_name, None, chrono::Utc::now())
            .await?;

        let snapshot = HealthSnapshot {
            cpu_usage_percent: Some(self.system.global_cpu_usage() as f64),
            ram_usage_percent: used_percent(self.system.total_memory(), self.system.available_memory()),
            disk_usage_percent: disk_usage_percent(),
            queue_size: pending + retry + recovered,
            active_jobs: active,
            pending_jobs: pending,
            worker_status: if alive { WORKER_ONLINE } else { WORKER_OFFLINE }.to_string(),
        };

        queries::record_system_health(&self.pool, &snapshot).await?;

        metrics::gauge!("signup_queue_size").set(snapshot.queue_size as f64);
        metrics::gauge!("signup_active_jobs").set(snapshot.active_jobs as f64);
        metrics::gauge!("signup_pending_jobs").set(snapshot.pending_jobs as f64);

        tracing::debug!(
            queue = snapshot.queue_size,
            active = snapshot.active_jobs,
            pending = snapshot.pending_jobs,
            worker = %snapshot.worker_status,
            "health snapshot recorded"
        );

        Ok(snapshot)
    }
}

/// Usage across all mounted disks, as one aggregate percentage.
fn disk_usage_percent() -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    let (total, available) = disks
        .iter()
        .fold((0u64, 0u64), |(t, a), disk| {
            (t + disk.total_space(), a + disk.available_space())
        });
    used_percent(total, available)
}

fn used_percent(total: u64, available: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(used as f64 / total as f64 * 100.0)
}
