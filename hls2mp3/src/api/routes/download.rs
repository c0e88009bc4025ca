//! Artifact download route.

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::services::ServeFile;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::error::Error;

pub fn router() -> Router<AppState> {
    Router::new().route("/download/{filename}", get(download))
}

/// Stream a completed artifact.
///
/// The file name is only used to look up the owning job; the served path
/// always comes from the registry.
async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let job = state.manager.artifact_for(&filename).await?;

    let req = axum::http::Request::builder()
        .body(Body::empty())
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let served = ServeFile::new(job.output_path())
        .try_call(req)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to serve file: {}", e)))?;

    // Swept between the lookup and the open.
    if served.status() == StatusCode::NOT_FOUND {
        return Err(Error::Expired(filename).into());
    }

    let mut response = served.into_response();
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", job.file_name()))
        .map_err(|e| ApiError::internal(e.to_string()))?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);

    if state.manager.config().delete_after_download {
        // The open handle keeps streaming after the path is unlinked.
        let evicted = state.manager.release(job.id()).await;
        debug!(job_id = %job.id(), ?evicted, "Released artifact after download");
    }

    Ok(response)
}
