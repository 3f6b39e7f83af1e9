use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a signup job.
///
/// Stored and serialized in SCREAMING_SNAKE_CASE; unrecognized values are
/// rejected at the parse boundary rather than stored.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retry,
    FailedRecovered,
}

impl JobStatus {
    /// Terminal states: no further transitions are legal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// States the dispatcher may claim a job out of.
    pub fn is_claimable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Retry | JobStatus::FailedRecovered
        )
    }

    /// States entered by consuming retry budget.
    pub fn is_retrying(self) -> bool {
        matches!(self, JobStatus::Retry | JobStatus::FailedRecovered)
    }

    /// Whether moving from `self` to `next` is a legal status transition.
    ///
    /// Budget enforcement (retry_count vs max_retries) is layered on top by
    /// the store; this table is pure shape.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Retry)
                | (Running, FailedRecovered)
                | (Retry, Running)
                | (Retry, Failed)
                | (FailedRecovered, Running)
                | (FailedRecovered, Failed)
        )
    }
}

/// Sub-status of the post-submission verification phase (OTP/manual review).
///
/// Independent of [`JobStatus`]: no verification value feeds back into the
/// main transition table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Pending,
    Submitted,
    Verified,
    Rejected,
    Error,
}

impl VerificationStatus {
    /// Whether `self` may be recorded when the job currently carries
    /// `current` (`None` = verification phase not yet reached).
    pub fn can_follow(self, current: Option<VerificationStatus>) -> bool {
        use VerificationStatus::*;
        match (current, self) {
            // Any state may degrade to ERROR, including unset.
            (_, Error) => true,
            (None, Pending) | (None, Submitted) => true,
            (Some(Pending), Submitted) => true,
            (Some(Submitted), Verified) | (Some(Submitted), Rejected) => true,
            _ => false,
        }
    }
}

/// One unit of signup work with its persisted lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Source payload reference (opaque to the core).
    pub json_filename: String,
    /// Generated output reference, if the pipeline produced one.
    pub excel_filename: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub status: JobStatus,
    pub retry_count: i32,
    pub verification_status: Option<VerificationStatus>,
    pub verification_screenshot: Option<String>,
    pub verification_html: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set once, on the first transition into RUNNING.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once, on the transition into COMPLETED or FAILED.
    pub completed_at: Option<DateTime<Utc>>,
    /// Stamped on each transition into RETRY; anchors the backoff window.
    pub retried_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub last_error_step: Option<String>,
    /// Owning-worker claim, present only while RUNNING.
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Wall-clock processing time, available once the job is terminal.
    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_seconds()),
            _ => None,
        }
    }
}

/// Payload for creating a job; the store assigns id, status, and created_at.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub json_filename: String,
    pub excel_filename: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
}

impl NewJob {
    pub fn new(json_filename: &str) -> Self {
        Self {
            json_filename: json_filename.to_string(),
            excel_filename: None,
            email: None,
            username: None,
            name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_accepted() {
        use JobStatus::*;
        let legal = [
            (Pending, Running),
            (Running, Completed),
            (Running, Failed),
            (Running, Retry),
            (Running, FailedRecovered),
            (Retry, Running),
            (Retry, Failed),
            (FailedRecovered, Running),
            (FailedRecovered, Failed),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
        }
    }

    #[test]
    fn illegal_transitions_rejected() {
        use JobStatus::*;
        let illegal = [
            (Completed, Running),
            (Completed, Pending),
            (Failed, Running),
            (Failed, Retry),
            (Pending, Completed),
            (Pending, Retry),
            (Pending, Failed),
            (Retry, Completed),
            (Retry, FailedRecovered),
            (FailedRecovered, Completed),
            (Running, Pending),
            (Running, Running),
        ];
        for (from, to) in illegal {
            assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
        }
    }

    #[test]
    fn terminal_and_claimable_sets() {
        use JobStatus::*;
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Running.is_terminal());
        assert!(!FailedRecovered.is_terminal());

        assert!(Pending.is_claimable());
        assert!(Retry.is_claimable());
        assert!(FailedRecovered.is_claimable());
        assert!(!Running.is_claimable());
        assert!(!Completed.is_claimable());

        assert!(Retry.is_retrying());
        assert!(FailedRecovered.is_retrying());
        assert!(!Failed.is_retrying());
    }

    #[test]
    fn status_storage_round_trip() {
        assert_eq!(JobStatus::FailedRecovered.to_string(), "FAILED_RECOVERED");
        assert_eq!(
            "FAILED_RECOVERED".parse::<JobStatus>().unwrap(),
            JobStatus::FailedRecovered
        );
        assert_eq!("PENDING".parse::<JobStatus>().unwrap(), JobStatus::Pending);
        assert!("pending".parse::<JobStatus>().is_err());
        assert!("BOGUS".parse::<JobStatus>().is_err());
    }

    #[test]
    fn verification_chain() {
        use VerificationStatus::*;
        assert!(Pending.can_follow(None));
        assert!(Submitted.can_follow(None));
        assert!(Submitted.can_follow(Some(Pending)));
        assert!(Verified.can_follow(Some(Submitted)));
        assert!(Rejected.can_follow(Some(Submitted)));

        // ERROR is reachable from anywhere.
        assert!(Error.can_follow(None));
        assert!(Error.can_follow(Some(Pending)));
        assert!(Error.can_follow(Some(Verified)));

        assert!(!Verified.can_follow(Some(Pending)));
        assert!(!Verified.can_follow(None));
        assert!(!Rejected.can_follow(Some(Verified)));
        assert!(!Pending.can_follow(Some(Submitted)));
        assert!(!Submitted.can_follow(Some(Rejected)));
    }

    #[test]
    fn duration_requires_both_timestamps() {
        let mut job = Job {
            id: Uuid::new_v4(),
            json_filename: "batch_001.json".to_string(),
            excel_filename: None,
            email: None,
            username: None,
            name: None,
            status: JobStatus::Running,
            retry_count: 0,
            verification_status: None,
            verification_screenshot: None,
            verification_html: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            retried_at: None,
            error_message: None,
            last_error_step: None,
            claimed_by: Some("worker-1".to_string()),
            claimed_at: Some(Utc::now()),
        };
        assert_eq!(job.duration_seconds(), None);

        job.completed_at = Some(job.started_at.unwrap() + chrono::Duration::seconds(42));
        assert_eq!(job.duration_seconds(), Some(42));
    }
}
