use signup_orchestrator::{
    config::AppConfig,
    db::{self, queries},
    services::{driver::SimulatedDriver, heartbeat::HeartbeatMonitor, rate_limit::RateLimiter},
    worker::{Worker, WorkerSettings},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting signup worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to SQLite database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let limiter = Arc::new(RateLimiter::new(
        config.max_jobs_per_hour,
        config.delay_between_jobs(),
        config.rate_limit_enabled,
    ));
    // Browser drivers plug in here; the simulated one walks the workflow
    // without touching a real site.
    let driver = Arc::new(SimulatedDriver::new());
    let settings = WorkerSettings::from_config(&config);
    let worker = Worker::new(db_pool.clone(), limiter, driver, settings);
    let monitor = HeartbeatMonitor::new(db_pool.clone(), config.liveness_threshold());

    // Exit after the restart interval; the supervisor starts a fresh process.
    let restart_after = config.restart_interval();
    let started = Instant::now();
    // Backdated so the first loop iteration pulses immediately.
    let mut last_pulse = Instant::now()
        .checked_sub(config.heartbeat_interval())
        .unwrap_or_else(Instant::now);

    tracing::info!(worker = %config.worker_name, "Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        if started.elapsed() >= restart_after {
            tracing::info!(
                uptime_hours = started.elapsed().as_secs() / 3600,
                "Restart interval reached, exiting for supervisor restart"
            );
            break;
        }

        // Idle pulse between claims; the engine's ticker covers in-claim time.
        if last_pulse.elapsed() >= config.heartbeat_interval() {
            if let Err(e) = monitor.record(&config.worker_name, None).await {
                tracing::warn!(worker = %config.worker_name, error = %e, "idle heartbeat failed");
            }
            last_pulse = Instant::now();
        }

        match worker.run_once().await {
            Ok(true) => {
                // Job processed, continue immediately
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                // No claimable job, sleep before next poll
                tracing::trace!("No claimable jobs, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                let _ = queries::record_error(
                    &db_pool,
                    "ERROR",
                    Some("worker"),
                    None,
                    "job processing cycle failed",
                    Some(&e.to_string()),
                )
                .await;
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}
