use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::config::RetryPolicy;
use crate::db::{queries, StoreError};
use crate::models::job::{Job, JobStatus};
use crate::models::log::{NewJobLog, StepStatus};
use crate::services::heartbeat::HeartbeatMonitor;

/// Counts from one pass over the RUNNING set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub reclaimed: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub errors: usize,
}

enum SweepOutcome {
    Healthy,
    Reclaimed,
    Failed,
    Conflict,
}

/// Periodically reclaims RUNNING jobs whose worker died or whose run has
/// exceeded the time budget.
///
/// A reclaimed job goes to FAILED_RECOVERED (consuming one retry) when budget
/// remains, FAILED otherwise. Every reclaim is conditioned on the exact claim
/// observed during the scan, so a job that finishes or is re-claimed
/// mid-sweep is left alone.
pub struct RecoverySweeper {
    pool: SqlitePool,
    monitor: HeartbeatMonitor,
    policy: RetryPolicy,
    job_timeout: Duration,
}

impl RecoverySweeper {
    pub fn new(
        pool: SqlitePool,
        monitor: HeartbeatMonitor,
        policy: RetryPolicy,
        job_timeout: Duration,
    ) -> Self {
        Self { pool, monitor, policy, job_timeout }
    }

    /// One full pass. Trouble with an individual job is recorded and skipped;
    /// only a failure to scan at all aborts the sweep.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let running = queries::jobs_by_status(&self.pool, JobStatus::Running).await?;
        let now = Utc::now();
        let mut report = SweepReport::default();

        for job in &running {
            report.examined += 1;
            match self.sweep_job(job, now).await {
                Ok(SweepOutcome::Healthy) => {}
                Ok(SweepOutcome::Reclaimed) => report.reclaimed += 1,
                Ok(SweepOutcome::Failed) => report.failed += 1,
                Ok(SweepOutcome::Conflict) => report.conflicts += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(job_id = %job.id, error = %e, "sweep of job failed");
                    let _ = queries::record_error(
                        &self.pool,
                        "ERROR",
                        Some("sweeper"),
                        Some(job.id),
                        "failed to sweep running job",
                        Some(&e.to_string()),
                    )
                    .await;
                }
            }
        }

        if report.reclaimed > 0 || report.failed > 0 || report.errors > 0 {
            tracing::info!(
                examined = report.examined,
                reclaimed = report.reclaimed,
                failed = report.failed,
                conflicts = report.conflicts,
                errors = report.errors,
                "recovery sweep finished"
            );
        } else {
            tracing::debug!(examined = report.examined, "recovery sweep found nothing to do");
        }

        Ok(report)
    }

    async fn sweep_job(&self, job: &Job, now: DateTime<Utc>) -> Result<SweepOutcome, StoreError> {
        // A RUNNING row with neither claim nor start epoch is abandoned.
        let timed_out = match job.claimed_at.or(job.started_at) {
            Some(began) => now
                .signed_duration_since(began)
                .to_std()
                .map(|elapsed| elapsed > self.job_timeout)
                .unwrap_or(false),
            None => true,
        };

        let alive = match job.claimed_by.as_deref() {
            Some(worker) => self.monitor.worker_alive(worker, job.claimed_at, now).await?,
            None => false,
        };

        // A hung worker heartbeats forever; the time budget trumps its pulses.
        if !timed_out && alive {
            return Ok(SweepOutcome::Healthy);
        }

        let cause = if timed_out {
            format!("ran past the {}s job timeout", self.job_timeout.as_secs())
        } else {
            match job.claimed_by.as_deref() {
                Some(worker) => format!("worker '{worker}' stopped heartbeating"),
                None => "no owning worker recorded".to_string(),
            }
        };

        let exhausted = self.policy.budget_exhausted(job.retry_count);
        let (target, diag) = if exhausted {
            (
                JobStatus::Failed,
                format!(
                    "abandoned run: {cause}; retry budget exhausted ({}/{})",
                    job.retry_count, self.policy.max_retries
                ),
            )
        } else {
            (JobStatus::FailedRecovered, format!("reclaimed from abandoned run: {cause}"))
        };

        match queries::transition_job(
            &self.pool,
            job,
            target,
            Some(&diag),
            Some("recovery_sweep"),
            self.policy.max_retries,
        )
        .await
        {
            Ok(moved) => {
                let mut entry = NewJobLog::new("recovery_sweep", &diag, StepStatus::Failed);
                entry.error_message = Some(cause);
                if let Err(e) = queries::append_job_log(&self.pool, job.id, &entry).await {
                    tracing::warn!(job_id = %job.id, error = %e, "failed to log reclaim");
                }

                if exhausted {
                    metrics::counter!("signup_jobs_failed_total").increment(1);
                    tracing::warn!(
                        job_id = %job.id,
                        retry_count = moved.retry_count,
                        "abandoned job failed, retry budget exhausted"
                    );
                    Ok(SweepOutcome::Failed)
                } else {
                    metrics::counter!("signup_jobs_recovered_total").increment(1);
                    tracing::warn!(
                        job_id = %job.id,
                        retry_count = moved.retry_count,
                        worker = job.claimed_by.as_deref().unwrap_or("none"),
                        "reclaimed abandoned job"
                    );
                    Ok(SweepOutcome::Reclaimed)
                }
            }
            // The job finished or was re-claimed between scan and reclaim.
            Err(StoreError::Conflict(_)) => {
                tracing::debug!(job_id = %job.id, "job moved mid-sweep, leaving it alone");
                Ok(SweepOutcome::Conflict)
            }
            Err(e) => Err(e),
        }
    }
}
