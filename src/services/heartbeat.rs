use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{queries, StoreError};
use crate::models::heartbeat::WorkerHeartbeat;

/// Records worker liveness pulses and answers "is this worker alive".
///
/// A worker counts as alive when its newest pulse is within the threshold, or
/// when the claim under inspection is younger than the threshold. The second
/// rule covers the gap between claiming a job and the first pulse landing, so
/// a freshly claimed job is never swept as abandoned.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    pool: SqlitePool,
    threshold: Duration,
}

impl HeartbeatMonitor {
    pub fn new(pool: SqlitePool, threshold: Duration) -> Self {
        Self { pool, threshold }
    }

    /// Append a pulse for `worker`, tagged with the job it is driving.
    pub async fn record(&self, worker: &str, current_job_id: Option<Uuid>) -> Result<(), StoreError> {
        queries::record_heartbeat(&self.pool, worker, current_job_id, Utc::now()).await
    }

    /// The newest pulse for `worker`, if it has ever reported.
    pub async fn latest(&self, worker: &str) -> Result<Option<WorkerHeartbeat>, StoreError> {
        queries::latest_heartbeat(&self.pool, worker).await
    }

    /// Whether `worker` should be treated as alive at `now`.
    pub async fn worker_alive(
        &self,
        worker: &str,
        claimed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if let Some(at) = claimed_at {
            if self.is_fresh(at, now) {
                return Ok(true);
            }
        }

        match self.latest(worker).await? {
            Some(pulse) => Ok(self.is_fresh(pulse.timestamp, now)),
            None => Ok(false),
        }
    }

    fn is_fresh(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A timestamp ahead of `now` can only come from clock skew; treat it
        // as fresh rather than sweeping a claim the instant it lands.
        now.signed_duration_since(at)
            .to_std()
            .map(|age| age <= self.threshold)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    fn monitor(pool: SqlitePool, threshold_secs: u64) -> HeartbeatMonitor {
        HeartbeatMonitor::new(pool, Duration::from_secs(threshold_secs))
    }

    #[tokio::test]
    async fn record_then_latest_round_trips() {
        let pool = test_pool().await;
        let monitor = monitor(pool, 60);
        let job_id = Uuid::new_v4();

        monitor.record("signup_worker", Some(job_id)).await.unwrap();

        let pulse = monitor.latest("signup_worker").await.unwrap().unwrap();
        assert_eq!(pulse.worker_name, "signup_worker");
        assert_eq!(pulse.current_job_id, Some(job_id));
        assert!(monitor.latest("other_worker").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn silent_worker_is_dead() {
        let pool = test_pool().await;
        let monitor = monitor(pool, 60);

        let alive = monitor
            .worker_alive("signup_worker", None, Utc::now())
            .await
            .unwrap();
        assert!(!alive);
    }

    #[tokio::test]
    async fn stale_pulse_is_dead_and_recent_pulse_is_alive() {
        let pool = test_pool().await;
        let monitor = monitor(pool.clone(), 60);
        let now = Utc::now();

        queries::record_heartbeat(&pool, "signup_worker", None, now - ChronoDuration::seconds(90))
            .await
            .unwrap();
        assert!(!monitor.worker_alive("signup_worker", None, now).await.unwrap());

        queries::record_heartbeat(&pool, "signup_worker", None, now - ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert!(monitor.worker_alive("signup_worker", None, now).await.unwrap());
    }

    #[tokio::test]
    async fn fresh_claim_counts_as_life_before_any_pulse() {
        let pool = test_pool().await;
        let monitor = monitor(pool, 60);
        let now = Utc::now();

        // No pulse recorded at all, but the claim is seconds old.
        let alive = monitor
            .worker_alive("signup_worker", Some(now - ChronoDuration::seconds(5)), now)
            .await
            .unwrap();
        assert!(alive);

        // An old claim with no pulse does not count.
        let alive = monitor
            .worker_alive("signup_worker", Some(now - ChronoDuration::seconds(300)), now)
            .await
            .unwrap();
        assert!(!alive);
    }
}
