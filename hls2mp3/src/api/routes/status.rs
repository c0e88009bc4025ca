//! Job status route.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::StatusResponse;
use crate::api::server::AppState;
use crate::conversion::JobId;

pub fn router() -> Router<AppState> {
    Router::new().route("/status/{task_id}", get(get_status))
}

async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    // Malformed ids cannot name a job.
    let id: JobId = task_id
        .parse()
        .map_err(|_| ApiError::not_found(format!("Job '{}' not found", task_id)))?;

    let job = state.manager.job(id)?;
    let ttl = state.manager.config().retention_ttl;
    Ok(Json(StatusResponse::from_job(&job, ttl)))
}
