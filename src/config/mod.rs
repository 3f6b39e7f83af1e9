use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Name this process reports in heartbeats and claims
    #[serde(default = "default_worker_name")]
    pub worker_name: String,

    /// Retry budget per job; once exhausted the job goes to FAILED
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay before a RETRY job becomes claimable again
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// Double the retry delay per attempt instead of keeping it flat
    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,

    /// Hard ceiling on a single claim before the sweeper reclaims the job
    #[serde(default = "default_job_timeout_minutes")]
    pub job_timeout_minutes: u64,

    /// Wait budget for the OTP/verification phase, handed to the driver
    #[serde(default = "default_otp_timeout_minutes")]
    pub otp_timeout_minutes: u64,

    /// Master switch for the claim rate limiter
    #[serde(default = "default_rate_limit_enabled")]
    pub rate_limit_enabled: bool,

    /// Sliding-window cap on successful claims
    #[serde(default = "default_max_jobs_per_hour")]
    pub max_jobs_per_hour: u32,

    /// Minimum spacing between any two successful claims
    #[serde(default = "default_delay_between_jobs_seconds")]
    pub delay_between_jobs_seconds: u64,

    /// Pulse cadence while a worker holds a claim; liveness threshold is 2x
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    /// Worker processes exit after this long and rely on the supervisor to restart them
    #[serde(default = "default_restart_interval_hours")]
    pub restart_interval_hours: u64,

    /// Recovery sweeper period
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// SystemHealth sampling period
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite:orchestrator.db?mode=rwc".to_string()
}

fn default_worker_name() -> String {
    "signup_worker".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    60
}

fn default_exponential_backoff() -> bool {
    true
}

fn default_job_timeout_minutes() -> u64 {
    30
}

fn default_otp_timeout_minutes() -> u64 {
    5
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_max_jobs_per_hour() -> u32 {
    20
}

fn default_delay_between_jobs_seconds() -> u64 {
    30
}

fn default_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_restart_interval_hours() -> u64 {
    24
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_health_check_interval_seconds() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: default_database_url(),
            worker_name: default_worker_name(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
            exponential_backoff: default_exponential_backoff(),
            job_timeout_minutes: default_job_timeout_minutes(),
            otp_timeout_minutes: default_otp_timeout_minutes(),
            rate_limit_enabled: default_rate_limit_enabled(),
            max_jobs_per_hour: default_max_jobs_per_hour(),
            delay_between_jobs_seconds: default_delay_between_jobs_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            restart_interval_hours: default_restart_interval_hours(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            health_check_interval_seconds: default_health_check_interval_seconds(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_seconds),
            exponential_backoff: self.exponential_backoff,
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_minutes * 60)
    }

    pub fn otp_timeout(&self) -> Duration {
        Duration::from_secs(self.otp_timeout_minutes * 60)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// A worker with no pulse inside this window is presumed dead.
    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds * 2)
    }

    pub fn delay_between_jobs(&self) -> Duration {
        Duration::from_secs(self.delay_between_jobs_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn restart_interval(&self) -> Duration {
        Duration::from_secs(self.restart_interval_hours * 3600)
    }
}

/// Retry budget and backoff shape, passed into every component that branches
/// on either. Components never read ambient configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub exponential_backoff: bool,
}

impl RetryPolicy {
    /// True once a job may no longer enter a retrying state.
    pub fn budget_exhausted(&self, retry_count: i32) -> bool {
        retry_count >= self.max_retries as i32
    }

    /// Delay a RETRY job must sit out, given its post-increment retry count.
    pub fn backoff_delay(&self, retry_count: i32) -> Duration {
        if !self.exponential_backoff {
            return self.retry_delay;
        }
        // retry_count is 1-based for a job sitting in RETRY.
        let exponent = retry_count.saturating_sub(1).clamp(0, 16) as u32;
        self.retry_delay.saturating_mul(2u32.saturating_pow(exponent))
    }
}
