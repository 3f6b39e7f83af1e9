use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::{queries, StoreError};
use crate::models::api::{CreateJobRequest, ErrorListParams, JobListParams};
use crate::models::error_log::ErrorLog;
use crate::models::health::SystemHealth;
use crate::models::job::{Job, NewJob};
use crate::models::log::JobLog;

const MAX_PAGE: i64 = 500;

fn error_status(operation: &str, e: StoreError) -> StatusCode {
    match e {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Corrupt(_) | StoreError::Database(_) => {
            tracing::error!(operation, error = %e, "store operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// POST /api/v1/jobs — submit a payload reference as a new PENDING job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), StatusCode> {
    payload.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let new_job = NewJob {
        json_filename: payload.json_filename,
        excel_filename: payload.excel_filename,
        email: payload.email,
        username: payload.username,
        name: payload.name,
    };
    let job = queries::create_job(&state.db, &new_job)
        .await
        .map_err(|e| error_status("create_job", e))?;

    metrics::counter!("signup_jobs_created_total").increment(1);
    tracing::info!(job_id = %job.id, source = %job.json_filename, "job created");

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/jobs — list jobs newest-first, optionally filtered by status.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> Result<Json<Vec<Job>>, StatusCode> {
    let limit = params.limit.clamp(1, MAX_PAGE);
    let offset = params.offset.max(0);
    let jobs = queries::list_jobs(&state.db, params.status, offset, limit)
        .await
        .map_err(|e| error_status("list_jobs", e))?;
    Ok(Json(jobs))
}

/// GET /api/v1/jobs/{id} — fetch one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, StatusCode> {
    let job = queries::get_job(&state.db, job_id)
        .await
        .map_err(|e| error_status("get_job", e))?;
    Ok(Json(job))
}

/// DELETE /api/v1/jobs/{id} — remove a job and its log trail.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    queries::delete_job(&state.db, job_id)
        .await
        .map_err(|e| error_status("delete_job", e))?;
    tracing::info!(job_id = %job_id, "job deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/jobs/{id}/logs — a job's step trail, oldest first.
pub async fn job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Vec<JobLog>>, StatusCode> {
    let trail = queries::job_logs(&state.db, job_id)
        .await
        .map_err(|e| error_status("job_logs", e))?;
    Ok(Json(trail))
}

/// GET /api/v1/errors — recent system-wide error records.
pub async fn recent_errors(
    State(state): State<AppState>,
    Query(params): Query<ErrorListParams>,
) -> Result<Json<Vec<ErrorLog>>, StatusCode> {
    let limit = params.limit.clamp(1, MAX_PAGE);
    let errors = queries::recent_errors(&state.db, limit)
        .await
        .map_err(|e| error_status("recent_errors", e))?;
    Ok(Json(errors))
}

/// GET /api/v1/system/health — the latest resource/queue snapshot.
pub async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<SystemHealth>, StatusCode> {
    let snapshot = queries::latest_system_health(&state.db)
        .await
        .map_err(|e| error_status("system_health", e))?;
    snapshot.map(Json).ok_or(StatusCode::NOT_FOUND)
}
