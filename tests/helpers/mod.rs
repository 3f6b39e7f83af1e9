//! Shared fixtures for the lifecycle tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use signup_orchestrator::config::RetryPolicy;
use signup_orchestrator::db::{self, queries};
use signup_orchestrator::models::job::{Job, NewJob};
use signup_orchestrator::services::rate_limit::RateLimiter;
use signup_orchestrator::worker::WorkerSettings;

/// Single-connection in-memory store, migrated.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// File-backed store for tests that exercise real cross-connection
/// concurrency. The returned directory must outlive the pool.
pub async fn file_pool() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/jobs.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (pool, dir)
}

pub fn sample_payload(tag: &str) -> NewJob {
    NewJob {
        json_filename: format!("batch_{tag}.json"),
        excel_filename: None,
        email: Some(format!("{tag}@example.com")),
        username: Some(tag.to_string()),
        name: None,
    }
}

pub async fn create_pending_job(pool: &SqlitePool, tag: &str) -> Job {
    queries::create_job(pool, &sample_payload(tag)).await.unwrap()
}

/// Policy with no backoff wait, for tests that re-dispatch immediately.
pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        retry_delay: Duration::ZERO,
        exponential_backoff: false,
    }
}

/// Limiter that admits everything.
pub fn open_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(u32::MAX, Duration::ZERO, false))
}

/// Worker knobs sized for fast tests.
pub fn fast_settings(name: &str, max_retries: u32) -> WorkerSettings {
    WorkerSettings {
        name: name.to_string(),
        policy: fast_policy(max_retries),
        job_timeout: Duration::from_secs(5),
        otp_timeout: Duration::from_secs(1),
        heartbeat_interval: Duration::from_millis(50),
    }
}

/// Push a claim (and every pulse its owner has written) into the past so the
/// sweeper sees the run as stale.
pub async fn age_claim(pool: &SqlitePool, job_id: Uuid, worker: &str, by: Duration) {
    let past = Utc::now() - chrono::Duration::from_std(by).unwrap();
    sqlx::query("UPDATE jobs SET claimed_at = ?1, started_at = ?1 WHERE id = ?2")
        .bind(past)
        .bind(job_id)
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("UPDATE worker_heartbeats SET timestamp = ?1 WHERE worker_name = ?2")
        .bind(past)
        .bind(worker)
        .execute(pool)
        .await
        .unwrap();
}
