//! Conversion submission route.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::api::error::ApiResult;
use crate::api::models::{
    AcceptedResponse, ConvertQuery, ConvertRequest, ConvertResponse, SubmitMode, status_url,
};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/convert", post(convert))
}

/// Submit a playlist URL for conversion.
///
/// By default the request is held open until the MP3 is ready. With
/// `?mode=async` it returns `202 Accepted` as soon as the job is registered.
async fn convert(
    State(state): State<AppState>,
    Query(query): Query<ConvertQuery>,
    Json(request): Json<ConvertRequest>,
) -> ApiResult<Response> {
    match query.mode {
        SubmitMode::Async => {
            let task_id = state.manager.submit(&request.url)?;
            let body = AcceptedResponse {
                task_id,
                status_url: status_url(task_id),
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
        SubmitMode::Sync => {
            let job = state.manager.convert(&request.url).await?;
            Ok(Json(ConvertResponse::from(&job)).into_response())
        }
    }
}
