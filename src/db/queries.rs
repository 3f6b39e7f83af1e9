use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::StoreError;
use crate::models::error_log::ErrorLog;
use crate::models::health::{HealthSnapshot, SystemHealth};
use crate::models::heartbeat::{WorkerHeartbeat, HEARTBEAT_ALIVE};
use crate::models::job::{Job, JobStatus, NewJob, VerificationStatus};
use crate::models::log::{JobLog, NewJobLog, StepStatus};

const SELECT_JOB: &str = r#"
SELECT id, json_filename, excel_filename, email, username, name, status,
       retry_count, verification_status, verification_screenshot,
       verification_html, created_at, started_at, completed_at, retried_at,
       error_message, last_error_step, claimed_by, claimed_at
FROM jobs
"#;

const SELECT_LOG: &str = r#"
SELECT id, job_id, step_name, step_number, action, status, timestamp,
       duration_ms, error_message, metadata
FROM job_logs
"#;

fn job_from_row(row: &SqliteRow) -> Result<Job, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<JobStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{status_str}'")))?;

    let verification_status = row
        .try_get::<Option<String>, _>("verification_status")?
        .map(|s| {
            s.parse::<VerificationStatus>()
                .map_err(|_| StoreError::Corrupt(format!("unknown verification status '{s}'")))
        })
        .transpose()?;

    Ok(Job {
        id: row.try_get("id")?,
        json_filename: row.try_get("json_filename")?,
        excel_filename: row.try_get("excel_filename")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        name: row.try_get("name")?,
        status,
        retry_count: row.try_get("retry_count")?,
        verification_status,
        verification_screenshot: row.try_get("verification_screenshot")?,
        verification_html: row.try_get("verification_html")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        retried_at: row.try_get("retried_at")?,
        error_message: row.try_get("error_message")?,
        last_error_step: row.try_get("last_error_step")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<JobLog, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<StepStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown step status '{status_str}'")))?;

    Ok(JobLog {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        step_name: row.try_get("step_name")?,
        step_number: row.try_get("step_number")?,
        action: row.try_get("action")?,
        status,
        timestamp: row.try_get("timestamp")?,
        duration_ms: row.try_get("duration_ms")?,
        error_message: row.try_get("error_message")?,
        metadata: row.try_get("metadata")?,
    })
}

/// Insert a new job with status forced to PENDING.
pub async fn create_job(pool: &SqlitePool, payload: &NewJob) -> Result<Job, StoreError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO jobs (id, json_filename, excel_filename, email, username, name,
                          status, retry_count, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', 0, ?7)
        "#,
    )
    .bind(id)
    .bind(&payload.json_filename)
    .bind(&payload.excel_filename)
    .bind(&payload.email)
    .bind(&payload.username)
    .bind(&payload.name)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Job {
        id,
        json_filename: payload.json_filename.clone(),
        excel_filename: payload.excel_filename.clone(),
        email: payload.email.clone(),
        username: payload.username.clone(),
        name: payload.name.clone(),
        status: JobStatus::Pending,
        retry_count: 0,
        verification_status: None,
        verification_screenshot: None,
        verification_html: None,
        created_at: now,
        started_at: None,
        completed_at: None,
        retried_at: None,
        error_message: None,
        last_error_step: None,
        claimed_by: None,
        claimed_at: None,
    })
}

/// Get a job by id.
pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Job, StoreError> {
    let sql = format!("{SELECT_JOB} WHERE id = ?1");
    let row = sqlx::query(&sql)
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(r) => job_from_row(&r),
        None => Err(StoreError::NotFound),
    }
}

/// List jobs newest-first, optionally filtered by status.
pub async fn list_jobs(
    pool: &SqlitePool,
    status: Option<JobStatus>,
    offset: i64,
    limit: i64,
) -> Result<Vec<Job>, StoreError> {
    let rows = match status {
        Some(s) => {
            let sql = format!(
                "{SELECT_JOB} WHERE status = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
            );
            sqlx::query(&sql)
                .bind(s.to_string())
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql =
                format!("{SELECT_JOB} ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2");
            sqlx::query(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(job_from_row).collect()
}

/// All jobs currently in the given status (recovery scans).
pub async fn jobs_by_status(
    pool: &SqlitePool,
    status: JobStatus,
) -> Result<Vec<Job>, StoreError> {
    let sql = format!("{SELECT_JOB} WHERE status = ?1 ORDER BY created_at ASC, id ASC");
    let rows = sqlx::query(&sql)
        .bind(status.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(job_from_row).collect()
}

/// Oldest claimable jobs (PENDING, RETRY, FAILED_RECOVERED) for the dispatcher.
pub async fn claimable_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<Job>, StoreError> {
    let sql = format!(
        r#"{SELECT_JOB}
        WHERE status IN ('PENDING', 'RETRY', 'FAILED_RECOVERED') AND claimed_by IS NULL
        ORDER BY created_at ASC, id ASC
        LIMIT ?1"#
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;

    rows.iter().map(job_from_row).collect()
}

/// Count jobs in a status.
pub async fn count_jobs_by_status(
    pool: &SqlitePool,
    status: JobStatus,
) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?1")
        .bind(status.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Delete a job and its log trail in one transaction.
pub async fn delete_job(pool: &SqlitePool, job_id: Uuid) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM job_logs WHERE job_id = ?1")
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }

    tx.commit().await?;
    Ok(())
}

/// Apply a status transition with its derived timestamp and claim changes.
///
/// `expected` is the row as the caller observed it; the update is conditioned
/// on that exact status and claim identity, so a row changed by anyone else in
/// the meantime makes this a no-op surfaced as `Conflict`. Entering RETRY or
/// FAILED_RECOVERED consumes retry budget and is rejected once
/// `retry_count >= max_retries` — the caller branches to FAILED instead.
pub async fn transition_job(
    pool: &SqlitePool,
    expected: &Job,
    new_status: JobStatus,
    error_message: Option<&str>,
    last_error_step: Option<&str>,
    max_retries: u32,
) -> Result<Job, StoreError> {
    if !expected.status.can_transition_to(new_status) {
        return Err(StoreError::Conflict(format!(
            "illegal transition {} -> {}",
            expected.status, new_status
        )));
    }

    if new_status.is_retrying() && expected.retry_count >= max_retries as i32 {
        return Err(StoreError::Conflict(format!(
            "retry budget exhausted ({} of {})",
            expected.retry_count, max_retries
        )));
    }

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?1,
            started_at = CASE WHEN ?1 = 'RUNNING' AND started_at IS NULL
                              THEN ?2 ELSE started_at END,
            completed_at = CASE WHEN ?1 IN ('COMPLETED', 'FAILED')
                                THEN ?2 ELSE completed_at END,
            retried_at = CASE WHEN ?1 = 'RETRY' THEN ?2 ELSE retried_at END,
            retry_count = retry_count + CASE WHEN ?1 IN ('RETRY', 'FAILED_RECOVERED')
                                             THEN 1 ELSE 0 END,
            error_message = COALESCE(?3, error_message),
            last_error_step = COALESCE(?4, last_error_step),
            claimed_by = CASE WHEN ?1 = 'RUNNING' THEN claimed_by ELSE NULL END,
            claimed_at = CASE WHEN ?1 = 'RUNNING' THEN claimed_at ELSE NULL END
        WHERE id = ?5 AND status = ?6 AND claimed_by IS ?7 AND claimed_at IS ?8
        "#,
    )
    .bind(new_status.to_string())
    .bind(now)
    .bind(error_message)
    .bind(last_error_step)
    .bind(expected.id)
    .bind(expected.status.to_string())
    .bind(expected.claimed_by.as_deref())
    .bind(expected.claimed_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        // Distinguish a vanished row from one that moved under us.
        get_job(pool, expected.id).await?;
        return Err(StoreError::Conflict(format!(
            "job {} changed concurrently",
            expected.id
        )));
    }

    get_job(pool, expected.id).await
}

/// Atomically claim a job for `worker`, transitioning it to RUNNING.
///
/// `candidate` is the row the dispatcher read; the claim is conditioned on
/// that status and retry epoch still holding. Exactly one concurrent claimant
/// wins; losers get `Conflict` and move on to their next candidate.
pub async fn claim_job(
    pool: &SqlitePool,
    candidate: &Job,
    worker: &str,
    now: DateTime<Utc>,
) -> Result<Job, StoreError> {
    if !candidate.status.can_transition_to(JobStatus::Running) {
        return Err(StoreError::Conflict(format!(
            "{} is not claimable",
            candidate.status
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'RUNNING',
            started_at = CASE WHEN started_at IS NULL THEN ?1 ELSE started_at END,
            claimed_by = ?2,
            claimed_at = ?1
        WHERE id = ?3 AND status = ?4 AND claimed_by IS NULL AND retried_at IS ?5
        "#,
    )
    .bind(now)
    .bind(worker)
    .bind(candidate.id)
    .bind(candidate.status.to_string())
    .bind(candidate.retried_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "job {} already claimed or changed",
            candidate.id
        )));
    }

    get_job(pool, candidate.id).await
}

/// Record a verification sub-status, preserving artifacts unless new ones
/// are supplied. Independent of the main status lifecycle.
pub async fn record_verification(
    pool: &SqlitePool,
    job_id: Uuid,
    status: VerificationStatus,
    screenshot: Option<&str>,
    html: Option<&str>,
) -> Result<Job, StoreError> {
    let current = get_job(pool, job_id).await?;

    if !status.can_follow(current.verification_status) {
        let from = current
            .verification_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "UNSET".to_string());
        return Err(StoreError::Conflict(format!(
            "illegal verification transition {from} -> {status}"
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET verification_status = ?1,
            verification_screenshot = COALESCE(?2, verification_screenshot),
            verification_html = COALESCE(?3, verification_html)
        WHERE id = ?4 AND verification_status IS ?5
        "#,
    )
    .bind(status.to_string())
    .bind(screenshot)
    .bind(html)
    .bind(job_id)
    .bind(current.verification_status.map(|s| s.to_string()))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "verification for job {job_id} changed concurrently"
        )));
    }

    get_job(pool, job_id).await
}

/// Append a step record to a job's trail.
pub async fn append_job_log(
    pool: &SqlitePool,
    job_id: Uuid,
    entry: &NewJobLog,
) -> Result<JobLog, StoreError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)")
        .bind(job_id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Err(StoreError::NotFound);
    }

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO job_logs (job_id, step_name, step_number, action, status,
                              timestamp, duration_ms, error_message, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(job_id)
    .bind(&entry.step_name)
    .bind(entry.step_number)
    .bind(&entry.action)
    .bind(entry.status.to_string())
    .bind(now)
    .bind(entry.duration_ms)
    .bind(&entry.error_message)
    .bind(&entry.metadata)
    .execute(pool)
    .await?;

    Ok(JobLog {
        id: result.last_insert_rowid(),
        job_id,
        step_name: entry.step_name.clone(),
        step_number: entry.step_number,
        action: entry.action.clone(),
        status: entry.status,
        timestamp: now,
        duration_ms: entry.duration_ms,
        error_message: entry.error_message.clone(),
        metadata: entry.metadata.clone(),
    })
}

/// A job's step trail, oldest first.
pub async fn job_logs(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<JobLog>, StoreError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)")
        .bind(job_id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Err(StoreError::NotFound);
    }

    let sql = format!("{SELECT_LOG} WHERE job_id = ?1 ORDER BY timestamp ASC, id ASC");
    let rows = sqlx::query(&sql).bind(job_id).fetch_all(pool).await?;

    rows.iter().map(log_from_row).collect()
}

/// Most recent step records across all jobs.
pub async fn recent_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<JobLog>, StoreError> {
    let sql = format!("{SELECT_LOG} ORDER BY timestamp DESC, id DESC LIMIT ?1");
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;

    rows.iter().map(log_from_row).collect()
}

/// Append a liveness pulse for a worker.
pub async fn record_heartbeat(
    pool: &SqlitePool,
    worker: &str,
    current_job_id: Option<Uuid>,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO worker_heartbeats (worker_name, timestamp, status, current_job_id)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(worker)
    .bind(at)
    .bind(HEARTBEAT_ALIVE)
    .bind(current_job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// The newest pulse for a worker, if it has ever reported.
pub async fn latest_heartbeat(
    pool: &SqlitePool,
    worker: &str,
) -> Result<Option<WorkerHeartbeat>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, worker_name, timestamp, status, current_job_id
        FROM worker_heartbeats
        WHERE worker_name = ?1
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(worker)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(Some(WorkerHeartbeat {
            id: r.try_get("id")?,
            worker_name: r.try_get("worker_name")?,
            timestamp: r.try_get("timestamp")?,
            status: r.try_get("status")?,
            current_job_id: r.try_get("current_job_id")?,
        })),
        None => Ok(None),
    }
}

fn health_from_row(row: &SqliteRow) -> Result<SystemHealth, StoreError> {
    Ok(SystemHealth {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        cpu_usage_percent: row.try_get("cpu_usage_percent")?,
        ram_usage_percent: row.try_get("ram_usage_percent")?,
        disk_usage_percent: row.try_get("disk_usage_percent")?,
        queue_size: row.try_get("queue_size")?,
        active_jobs: row.try_get("active_jobs")?,
        pending_jobs: row.try_get("pending_jobs")?,
        worker_status: row.try_get("worker_status")?,
    })
}

/// Persist one resource/queue snapshot.
pub async fn record_system_health(
    pool: &SqlitePool,
    snapshot: &HealthSnapshot,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO system_health (timestamp, cpu_usage_percent, ram_usage_percent,
                                   disk_usage_percent, queue_size, active_jobs,
                                   pending_jobs, worker_status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(Utc::now())
    .bind(snapshot.cpu_usage_percent)
    .bind(snapshot.ram_usage_percent)
    .bind(snapshot.disk_usage_percent)
    .bind(snapshot.queue_size)
    .bind(snapshot.active_jobs)
    .bind(snapshot.pending_jobs)
    .bind(&snapshot.worker_status)
    .execute(pool)
    .await?;

    Ok(())
}

/// The most recent health snapshot.
pub async fn latest_system_health(
    pool: &SqlitePool,
) -> Result<Option<SystemHealth>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, timestamp, cpu_usage_percent, ram_usage_percent, disk_usage_percent,
               queue_size, active_jobs, pending_jobs, worker_status
        FROM system_health
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    row.map(|r| health_from_row(&r)).transpose()
}

/// Health snapshots from the last `hours` hours, oldest first.
pub async fn system_health_history(
    pool: &SqlitePool,
    hours: i64,
) -> Result<Vec<SystemHealth>, StoreError> {
    let cutoff = Utc::now() - Duration::hours(hours);
    let rows = sqlx::query(
        r#"
        SELECT id, timestamp, cpu_usage_percent, ram_usage_percent, disk_usage_percent,
               queue_size, active_jobs, pending_jobs, worker_status
        FROM system_health
        WHERE timestamp >= ?1
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.iter().map(health_from_row).collect()
}

/// Record a system-wide error, optionally correlated to a job.
pub async fn record_error(
    pool: &SqlitePool,
    level: &str,
    component: Option<&str>,
    job_id: Option<Uuid>,
    message: &str,
    detail: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO error_logs (timestamp, level, component, job_id, message, detail)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(Utc::now())
    .bind(level)
    .bind(component)
    .bind(job_id)
    .bind(message)
    .bind(detail)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent error records, newest first.
pub async fn recent_errors(pool: &SqlitePool, limit: i64) -> Result<Vec<ErrorLog>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, timestamp, level, component, job_id, message, detail
        FROM error_logs
        ORDER BY timestamp DESC, id DESC
        LIMIT ?1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            Ok(ErrorLog {
                id: r.try_get("id")?,
                timestamp: r.try_get("timestamp")?,
                level: r.try_get("level")?,
                component: r.try_get("component")?,
                job_id: r.try_get("job_id")?,
                message: r.try_get("message")?,
                detail: r.try_get("detail")?,
            })
        })
        .collect()
}
