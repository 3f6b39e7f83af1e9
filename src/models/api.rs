use garde::Validate;
use serde::Deserialize;

use crate::models::job::JobStatus;

/// Request to submit a new signup job. Presence/shape checks only; the
/// payload contents stay opaque to the core.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[garde(length(min = 1, max = 255))]
    pub json_filename: String,

    #[garde(length(min = 1, max = 255))]
    pub excel_filename: Option<String>,

    #[garde(length(min = 3, max = 255))]
    pub email: Option<String>,

    #[garde(length(min = 1, max = 255))]
    pub username: Option<String>,

    #[garde(length(min = 1, max = 255))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobListParams {
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct ErrorListParams {
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

fn default_list_limit() -> i64 {
    50
}
