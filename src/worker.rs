use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::{AppConfig, RetryPolicy};
use crate::db::{queries, StoreError};
use crate::models::job::{Job, JobStatus, VerificationStatus};
use crate::models::log::{NewJobLog, StepStatus};
use crate::services::dispatcher::Dispatcher;
use crate::services::driver::{AutomationDriver, DriveContext, DriveOutcome, DriveReport};
use crate::services::heartbeat::HeartbeatMonitor;
use crate::services::rate_limit::RateLimiter;
use crate::services::verification::VerificationTracker;

/// Knobs for one worker engine instance.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub name: String,
    pub policy: RetryPolicy,
    pub job_timeout: Duration,
    pub otp_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: config.worker_name.clone(),
            policy: config.retry_policy(),
            job_timeout: config.job_timeout(),
            otp_timeout: config.otp_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// Claims one job at a time and drives it to a terminal or retrying status.
///
/// The drive runs under the job time budget; at the deadline the driver
/// future is dropped and the attempt counts as retryable. A heartbeat ticker
/// pulses for the whole drive so the sweeper can tell a live run from a dead
/// one. Step logs and verification captures are best-effort audit data; only
/// the status transition decides the job's fate.
pub struct Worker<D: AutomationDriver> {
    pool: SqlitePool,
    dispatcher: Dispatcher,
    monitor: HeartbeatMonitor,
    tracker: VerificationTracker,
    driver: Arc<D>,
    settings: WorkerSettings,
}

impl<D: AutomationDriver> Worker<D> {
    pub fn new(
        pool: SqlitePool,
        limiter: Arc<RateLimiter>,
        driver: Arc<D>,
        settings: WorkerSettings,
    ) -> Self {
        let dispatcher = Dispatcher::new(pool.clone(), limiter, settings.policy);
        let monitor = HeartbeatMonitor::new(pool.clone(), settings.heartbeat_interval * 2);
        let tracker = VerificationTracker::new(pool.clone());
        Self { pool, dispatcher, monitor, tracker, driver, settings }
    }

    /// Claim and process one job. `Ok(false)` means nothing was claimable.
    pub async fn run_once(&self) -> Result<bool, StoreError> {
        let Some(job) = self.dispatcher.claim_next(&self.settings.name).await? else {
            return Ok(false);
        };
        self.process(job).await?;
        Ok(true)
    }

    async fn process(&self, job: Job) -> Result<(), StoreError> {
        tracing::info!(
            job_id = %job.id,
            worker = %self.settings.name,
            retry_count = job.retry_count,
            source = %job.json_filename,
            "processing job"
        );

        let ticker = self.spawn_heartbeat_ticker(job.id);
        let ctx = DriveContext {
            worker: self.settings.name.clone(),
            otp_timeout: self.settings.otp_timeout,
        };
        let report = match tokio::time::timeout(
            self.settings.job_timeout,
            self.driver.drive(&job, &ctx),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => self.timeout_report(),
        };
        ticker.abort();

        for step in &report.steps {
            if let Err(e) = queries::append_job_log(&self.pool, job.id, step).await {
                tracing::warn!(
                    job_id = %job.id,
                    step = %step.step_name,
                    error = %e,
                    "failed to append step log"
                );
            }
        }

        for capture in &report.verification {
            if let Err(e) = self
                .tracker
                .record(job.id, capture.status, capture.screenshot.as_deref(), capture.html.as_deref())
                .await
            {
                tracing::warn!(job_id = %job.id, error = %e, "failed to record verification capture");
            }
        }

        self.finish(&job, effective_outcome(&report)).await
    }

    async fn finish(&self, job: &Job, outcome: DriveOutcome) -> Result<(), StoreError> {
        let max_retries = self.settings.policy.max_retries;
        let result = match outcome {
            DriveOutcome::Success => {
                match queries::transition_job(&self.pool, job, JobStatus::Completed, None, None, max_retries)
                    .await
                {
                    Ok(done) => {
                        metrics::counter!("signup_jobs_completed_total").increment(1);
                        record_duration(&done);
                        tracing::info!(
                            job_id = %done.id,
                            duration_s = done.duration_seconds().unwrap_or(0),
                            "job completed"
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            DriveOutcome::Retryable { step, message } => {
                if self.settings.policy.budget_exhausted(job.retry_count) {
                    let diag = format!(
                        "{message}; retry budget exhausted ({}/{})",
                        job.retry_count, max_retries
                    );
                    match queries::transition_job(
                        &self.pool,
                        job,
                        JobStatus::Failed,
                        Some(&diag),
                        Some(&step),
                        max_retries,
                    )
                    .await
                    {
                        Ok(failed) => {
                            metrics::counter!("signup_jobs_failed_total").increment(1);
                            record_duration(&failed);
                            tracing::warn!(
                                job_id = %failed.id,
                                retry_count = failed.retry_count,
                                step = %step,
                                "job failed, retry budget exhausted"
                            );
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    match queries::transition_job(
                        &self.pool,
                        job,
                        JobStatus::Retry,
                        Some(&message),
                        Some(&step),
                        max_retries,
                    )
                    .await
                    {
                        Ok(retried) => {
                            metrics::counter!("signup_jobs_retried_total").increment(1);
                            tracing::info!(
                                job_id = %retried.id,
                                retry_count = retried.retry_count,
                                step = %step,
                                "job scheduled for retry"
                            );
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
            }
            DriveOutcome::Permanent { step, message } => {
                match queries::transition_job(
                    &self.pool,
                    job,
                    JobStatus::Failed,
                    Some(&message),
                    Some(&step),
                    max_retries,
                )
                .await
                {
                    Ok(failed) => {
                        metrics::counter!("signup_jobs_failed_total").increment(1);
                        record_duration(&failed);
                        tracing::warn!(job_id = %failed.id, step = %step, "job failed permanently");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(()) => Ok(()),
            // The sweeper reclaimed the job mid-drive; its verdict stands and
            // this attempt's outcome is discarded.
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(job_id = %job.id, reason = %reason, "job moved during drive, outcome discarded");
                let _ = queries::record_error(
                    &self.pool,
                    "WARNING",
                    Some("worker"),
                    Some(job.id),
                    "drive outcome discarded after concurrent transition",
                    Some(&reason),
                )
                .await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn timeout_report(&self) -> DriveReport {
        let budget = self.settings.job_timeout.as_secs();
        let mut step = NewJobLog::new(
            "job_timeout",
            "drive cancelled at the deadline",
            StepStatus::Failed,
        );
        step.duration_ms = Some(self.settings.job_timeout.as_millis() as i64);
        DriveReport::retryable("job_timeout", &format!("drive exceeded the {budget}s budget"))
            .with_step(step)
    }

    fn spawn_heartbeat_ticker(&self, job_id: Uuid) -> tokio::task::JoinHandle<()> {
        let monitor = self.monitor.clone();
        let worker = self.settings.name.clone();
        let period = self.settings.heartbeat_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = monitor.record(&worker, Some(job_id)).await {
                    tracing::warn!(worker = %worker, job_id = %job_id, error = %e, "heartbeat write failed");
                }
            }
        })
    }
}

/// The lifecycle verdict for a report, folding the verification policy into
/// the drive outcome: a rejected signup is permanent, a verification error is
/// worth another attempt. Drive failures stand as reported. The last capture
/// is the one the drive ended on.
fn effective_outcome(report: &DriveReport) -> DriveOutcome {
    if report.outcome == DriveOutcome::Success {
        if let Some(capture) = report.verification.last() {
            match capture.status {
                VerificationStatus::Rejected => {
                    return DriveOutcome::Permanent {
                        step: "verification".to_string(),
                        message: "signup rejected at verification".to_string(),
                    }
                }
                VerificationStatus::Error => {
                    return DriveOutcome::Retryable {
                        step: "verification".to_string(),
                        message: "verification check errored".to_string(),
                    }
                }
                _ => {}
            }
        }
    }
    report.outcome.clone()
}

fn record_duration(job: &Job) {
    if let Some(secs) = job.duration_seconds() {
        metrics::histogram!("signup_job_duration_seconds").record(secs as f64);
    }
}
