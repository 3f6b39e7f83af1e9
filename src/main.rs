mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::health_sampler::HealthSampler;
use services::heartbeat::HeartbeatMonitor;
use services::sweeper::RecoverySweeper;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing signup-orchestrator server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("signup_jobs_created_total", "Jobs submitted to the orchestrator");
    metrics::describe_counter!("signup_jobs_claimed_total", "Jobs handed to workers by the dispatcher");
    metrics::describe_counter!("signup_jobs_completed_total", "Jobs that reached COMPLETED");
    metrics::describe_counter!("signup_jobs_failed_total", "Jobs that reached FAILED");
    metrics::describe_counter!("signup_jobs_retried_total", "Retry transitions after failed attempts");
    metrics::describe_counter!("signup_jobs_recovered_total", "Abandoned jobs reclaimed by the sweeper");
    metrics::describe_histogram!(
        "signup_job_duration_seconds",
        "Wall clock from first claim to terminal status"
    );
    metrics::describe_gauge!("signup_queue_size", "Claimable jobs awaiting dispatch");
    metrics::describe_gauge!("signup_active_jobs", "Jobs currently RUNNING");
    metrics::describe_gauge!("signup_pending_jobs", "Jobs currently PENDING");

    // Initialize database connection pool
    tracing::info!("Connecting to SQLite database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let monitor = HeartbeatMonitor::new(db_pool.clone(), config.liveness_threshold());

    // Recovery sweeper: reclaims RUNNING jobs whose worker died or whose run
    // exceeded the time budget.
    let sweeper = RecoverySweeper::new(
        db_pool.clone(),
        monitor.clone(),
        config.retry_policy(),
        config.job_timeout(),
    );
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.sweep().await {
                tracing::error!(error = %e, "recovery sweep failed");
            }
        }
    });

    // Health sampler: persists resource/queue snapshots and queue gauges.
    let mut sampler = HealthSampler::new(db_pool.clone(), monitor, config.worker_name.clone());
    let sample_interval = config.health_check_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sample_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = sampler.sample_once().await {
                tracing::error!(error = %e, "health sample failed");
            }
        }
    });

    // Create shared application state
    let state = AppState::new(db_pool, config.clone());

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/jobs",
            post(routes::jobs::create_job).get(routes::jobs::list_jobs),
        )
        .route(
            "/api/v1/jobs/{job_id}",
            get(routes::jobs::get_job).delete(routes::jobs::delete_job),
        )
        .route("/api/v1/jobs/{job_id}/logs", get(routes::jobs::job_logs))
        .route("/api/v1/errors", get(routes::jobs::recent_errors))
        .route("/api/v1/system/health", get(routes::jobs::system_health))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting signup-orchestrator on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
