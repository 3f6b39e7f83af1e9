use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::config::RetryPolicy;
use crate::db::{queries, StoreError};
use crate::models::job::{Job, JobStatus};
use crate::services::rate_limit::RateLimiter;

// Well beyond the hourly rate ceiling, so a head of backoff-waiting RETRY
// jobs cannot hide eligible work further down the queue.
const CANDIDATE_SCAN: i64 = 256;

/// Hands out claimable jobs one at a time, oldest first.
///
/// The limiter permit is acquired before the store is touched and committed
/// only when a claim lands, so the hourly window counts real claims and
/// in-process claimants are serialized through the check. Lost races against
/// another process surface as store conflicts and move the scan to the next
/// candidate.
pub struct Dispatcher {
    pool: SqlitePool,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(pool: SqlitePool, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { pool, limiter, policy }
    }

    /// Claim the oldest eligible job for `worker`, or `None` when the limiter
    /// refuses or nothing is eligible right now.
    pub async fn claim_next(&self, worker: &str) -> Result<Option<Job>, StoreError> {
        let Some(permit) = self.limiter.admit(Instant::now()).await else {
            tracing::debug!(worker, "claim deferred by rate limiter");
            return Ok(None);
        };

        let now = Utc::now();
        let candidates = queries::claimable_jobs(&self.pool, CANDIDATE_SCAN).await?;
        for candidate in &candidates {
            if !backoff_elapsed(candidate, &self.policy, now) {
                continue;
            }

            match queries::claim_job(&self.pool, candidate, worker, now).await {
                Ok(job) => {
                    // First pulse lands with the claim; the worker's ticker
                    // takes over from here. A failed write must not strand
                    // the job we just claimed.
                    if let Err(e) = queries::record_heartbeat(&self.pool, worker, Some(job.id), now).await
                    {
                        tracing::warn!(job_id = %job.id, worker, error = %e, "claim pulse failed");
                    }
                    permit.commit(Instant::now());
                    metrics::counter!("signup_jobs_claimed_total").increment(1);
                    tracing::info!(
                        job_id = %job.id,
                        worker,
                        from_status = %candidate.status,
                        retry_count = job.retry_count,
                        "claimed job"
                    );
                    return Ok(Some(job));
                }
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(job_id = %candidate.id, worker, "lost claim race");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }
}

/// Whether a candidate has sat out its backoff window at `now`. Only RETRY
/// jobs wait; PENDING and FAILED_RECOVERED are immediately eligible.
fn backoff_elapsed(job: &Job, policy: &RetryPolicy, now: DateTime<Utc>) -> bool {
    if job.status != JobStatus::Retry {
        return true;
    }
    let Some(retried_at) = job.retried_at else {
        return true;
    };
    match now.signed_duration_since(retried_at).to_std() {
        Ok(waited) => waited >= policy.backoff_delay(job.retry_count),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    use crate::models::job::NewJob;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    fn sample_payload(tag: &str) -> NewJob {
        NewJob {
            json_filename: format!("batch_{tag}.json"),
            excel_filename: None,
            email: Some(format!("{tag}@example.com")),
            username: Some(tag.to_string()),
            name: None,
        }
    }

    fn policy(delay_secs: u64, exponential: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(delay_secs),
            exponential_backoff: exponential,
        }
    }

    fn open_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(0, Duration::ZERO, false))
    }

    fn retry_job(retry_count: i32, retried_ago_secs: i64) -> Job {
        Job {
            id: uuid::Uuid::new_v4(),
            json_filename: "batch.json".to_string(),
            excel_filename: None,
            email: None,
            username: None,
            name: None,
            status: JobStatus::Retry,
            retry_count,
            verification_status: None,
            verification_screenshot: None,
            verification_html: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            retried_at: Some(Utc::now() - ChronoDuration::seconds(retried_ago_secs)),
            error_message: None,
            last_error_step: None,
            claimed_by: None,
            claimed_at: None,
        }
    }

    #[test]
    fn backoff_waits_out_the_flat_delay() {
        let policy = policy(60, false);
        let now = Utc::now();

        assert!(!backoff_elapsed(&retry_job(1, 30), &policy, now));
        assert!(backoff_elapsed(&retry_job(1, 61), &policy, now));
    }

    #[test]
    fn backoff_doubles_per_retry_when_exponential() {
        let policy = policy(60, true);
        let now = Utc::now();

        // Second retry waits 120s, third 240s.
        assert!(backoff_elapsed(&retry_job(2, 121), &policy, now));
        assert!(!backoff_elapsed(&retry_job(2, 90), &policy, now));
        assert!(!backoff_elapsed(&retry_job(3, 200), &policy, now));
        assert!(backoff_elapsed(&retry_job(3, 241), &policy, now));
    }

    #[test]
    fn non_retry_candidates_skip_the_window() {
        let policy = policy(3600, true);
        let now = Utc::now();

        let mut job = retry_job(2, 0);
        job.status = JobStatus::Pending;
        assert!(backoff_elapsed(&job, &policy, now));
        job.status = JobStatus::FailedRecovered;
        assert!(backoff_elapsed(&job, &policy, now));
    }

    #[tokio::test]
    async fn claims_oldest_pending_job_first() {
        let pool = test_pool().await;
        let first = queries::create_job(&pool, &sample_payload("001")).await.unwrap();
        queries::create_job(&pool, &sample_payload("002")).await.unwrap();

        let dispatcher = Dispatcher::new(pool.clone(), open_limiter(), policy(0, false));
        let claimed = dispatcher.claim_next("worker-a").await.unwrap().unwrap();

        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker-a"));

        // The claim pulse landed alongside the claim.
        let pulse = queries::latest_heartbeat(&pool, "worker-a").await.unwrap().unwrap();
        assert_eq!(pulse.current_job_id, Some(claimed.id));
    }

    #[tokio::test]
    async fn empty_queue_yields_none() {
        let pool = test_pool().await;
        let dispatcher = Dispatcher::new(pool, open_limiter(), policy(0, false));
        assert!(dispatcher.claim_next("worker-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_job_waits_out_its_window_then_dispatches() {
        let pool = test_pool().await;
        let job = queries::create_job(&pool, &sample_payload("001")).await.unwrap();
        let claimed = queries::claim_job(&pool, &job, "w", Utc::now()).await.unwrap();
        queries::transition_job(&pool, &claimed, JobStatus::Retry, Some("flaky"), None, 3)
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(pool.clone(), open_limiter(), policy(60, false));
        // retried_at is fresh, so the job is still sitting out its window.
        assert!(dispatcher.claim_next("worker-a").await.unwrap().is_none());

        // Backdate the retry epoch past the window.
        let past = Utc::now() - ChronoDuration::seconds(61);
        sqlx::query("UPDATE jobs SET retried_at = ?1 WHERE id = ?2")
            .bind(past)
            .bind(job.id)
            .execute(&pool)
            .await
            .unwrap();

        let claimed = dispatcher.claim_next("worker-a").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.retry_count, 1);
    }

    #[tokio::test]
    async fn waiting_retry_head_does_not_starve_later_pending_jobs() {
        let pool = test_pool().await;
        let older = queries::create_job(&pool, &sample_payload("001")).await.unwrap();
        let claimed = queries::claim_job(&pool, &older, "w", Utc::now()).await.unwrap();
        queries::transition_job(&pool, &claimed, JobStatus::Retry, Some("flaky"), None, 3)
            .await
            .unwrap();
        let newer = queries::create_job(&pool, &sample_payload("002")).await.unwrap();

        let dispatcher = Dispatcher::new(pool, open_limiter(), policy(3600, false));
        let claimed = dispatcher.claim_next("worker-a").await.unwrap().unwrap();
        assert_eq!(claimed.id, newer.id);
    }

    #[tokio::test]
    async fn limiter_refusal_touches_nothing() {
        let pool = test_pool().await;
        queries::create_job(&pool, &sample_payload("001")).await.unwrap();

        // One claim per hour: the second attempt is refused.
        let limiter = Arc::new(RateLimiter::new(1, Duration::ZERO, true));
        let dispatcher = Dispatcher::new(pool.clone(), limiter, policy(0, false));

        assert!(dispatcher.claim_next("worker-a").await.unwrap().is_some());
        queries::create_job(&pool, &sample_payload("002")).await.unwrap();
        assert!(dispatcher.claim_next("worker-a").await.unwrap().is_none());

        let pending = queries::count_jobs_by_status(&pool, JobStatus::Pending).await.unwrap();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn fruitless_scan_consumes_no_window_slot() {
        let pool = test_pool().await;
        let limiter = Arc::new(RateLimiter::new(1, Duration::ZERO, true));
        let dispatcher = Dispatcher::new(pool.clone(), limiter, policy(0, false));

        // Empty queue: admitted but nothing claimed, slot released.
        assert!(dispatcher.claim_next("worker-a").await.unwrap().is_none());

        queries::create_job(&pool, &sample_payload("001")).await.unwrap();
        assert!(dispatcher.claim_next("worker-a").await.unwrap().is_some());
    }
}
