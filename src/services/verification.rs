use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{queries, StoreError};
use crate::models::job::{Job, VerificationStatus};

/// Tracks the email/OTP verification side-channel of a job.
///
/// Verification progress is recorded independently of the main status; how a
/// verification result feeds back into the job lifecycle is the worker's
/// call, not this tracker's.
#[derive(Clone)]
pub struct VerificationTracker {
    pool: SqlitePool,
}

impl VerificationTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a verification sub-status with any artifacts captured alongside
    /// it. Artifacts already on file are kept unless new ones are supplied.
    pub async fn record(
        &self,
        job_id: Uuid,
        status: VerificationStatus,
        screenshot: Option<&str>,
        html: Option<&str>,
    ) -> Result<Job, StoreError> {
        let job = queries::record_verification(&self.pool, job_id, status, screenshot, html).await?;
        tracing::info!(
            job_id = %job.id,
            verification = %status,
            has_screenshot = job.verification_screenshot.is_some(),
            "verification recorded"
        );
        Ok(job)
    }
}
