use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::job::{Job, VerificationStatus};
use crate::models::log::{NewJobLog, StepStatus};

/// Context handed to the driver for one attempt.
#[derive(Debug, Clone)]
pub struct DriveContext {
    pub worker: String,
    /// How long the driver may wait for the verification email/OTP.
    pub otp_timeout: Duration,
}

/// Verification-phase result captured during a drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCapture {
    pub status: VerificationStatus,
    pub screenshot: Option<String>,
    pub html: Option<String>,
}

/// How one drive attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    Success,
    /// Transient trouble; the job should re-enter the queue if budget remains.
    Retryable { step: String, message: String },
    /// Definitive refusal; retrying cannot change the answer.
    Permanent { step: String, message: String },
}

/// Everything a drive attempt reports back: the outcome, the step trail to
/// append, and the verification states observed along the way.
///
/// Captures are ordered as observed; a drive that submits and then sees a
/// rejection reports `[SUBMITTED, REJECTED]` so the stored chain advances
/// through both.
#[derive(Debug, Clone)]
pub struct DriveReport {
    pub outcome: DriveOutcome,
    pub steps: Vec<NewJobLog>,
    pub verification: Vec<VerificationCapture>,
}

impl DriveReport {
    pub fn success() -> Self {
        Self { outcome: DriveOutcome::Success, steps: Vec::new(), verification: Vec::new() }
    }

    pub fn retryable(step: &str, message: &str) -> Self {
        Self {
            outcome: DriveOutcome::Retryable {
                step: step.to_string(),
                message: message.to_string(),
            },
            steps: Vec::new(),
            verification: Vec::new(),
        }
    }

    pub fn permanent(step: &str, message: &str) -> Self {
        Self {
            outcome: DriveOutcome::Permanent {
                step: step.to_string(),
                message: message.to_string(),
            },
            steps: Vec::new(),
            verification: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: NewJobLog) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_verification(mut self, capture: VerificationCapture) -> Self {
        self.verification.push(capture);
        self
    }
}

/// The browser-automation seam. Implementations perform the actual signup
/// workflow; the engine around them owns claiming, retry budgeting, and
/// persistence.
///
/// Drivers report failure through the outcome, never through panics, and are
/// expected to honor `ctx.otp_timeout` for the verification wait.
#[async_trait]
pub trait AutomationDriver: Send + Sync + 'static {
    async fn drive(&self, job: &Job, ctx: &DriveContext) -> DriveReport;
}

/// Scripted driver for tests and dry runs.
///
/// Pops pre-loaded reports in order; once the script runs dry every drive
/// returns a canned happy path. An optional per-drive delay makes deadline
/// behavior reproducible.
pub struct SimulatedDriver {
    script: Mutex<VecDeque<DriveReport>>,
    delay: Duration,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self { script: Mutex::new(VecDeque::new()), delay: Duration::ZERO }
    }

    pub fn with_script(reports: Vec<DriveReport>) -> Self {
        Self { script: Mutex::new(reports.into()), delay: Duration::ZERO }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn happy_path(job: &Job) -> DriveReport {
        let mut report = DriveReport::success().with_verification(VerificationCapture {
            status: VerificationStatus::Submitted,
            screenshot: Some(format!("screenshots/{}.png", job.id)),
            html: Some(format!("snapshots/{}.html", job.id)),
        });
        let steps = [
            ("open_signup_page", "navigated to the registration form", 430),
            ("fill_registration_form", "filled profile fields from payload", 960),
            ("submit_registration", "submitted the form", 510),
            ("capture_verification", "captured post-submission verification state", 380),
        ];
        for (number, (name, action, ms)) in steps.iter().enumerate() {
            let mut step = NewJobLog::new(name, action, StepStatus::Success);
            step.step_number = Some(number as i32 + 1);
            step.duration_ms = Some(*ms);
            report = report.with_step(step);
        }
        report
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationDriver for SimulatedDriver {
    async fn drive(&self, job: &Job, _ctx: &DriveContext) -> DriveReport {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().await.pop_front();
        scripted.unwrap_or_else(|| Self::happy_path(job))
    }
}
