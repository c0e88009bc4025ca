//! API error handling.
//!
//! Provides consistent JSON error responses for the API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 404 for an artifact that existed but is no longer served.
    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "EXPIRED", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "FETCH_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::NotFound { .. } => ApiError::not_found(err.to_string()),
            Error::Expired(name) => ApiError::expired(format!("File '{}' has expired", name)),
            Error::Validation(msg) => ApiError::validation(msg.clone()),
            Error::Fetch { .. } => ApiError::bad_gateway(err.to_string()),
            Error::Resolution(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "RESOLUTION_ERROR", err.to_string())
            }
            Error::TranscodeFailure { code, .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "TRANSCODE_FAILED",
                err.to_string(),
            )
            .with_details(serde_json::json!({ "exit_code": code })),
            Error::ExecutorSpawn(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTOR_UNAVAILABLE",
                err.to_string(),
            ),
            Error::Cancelled => ApiError::service_unavailable(err.to_string()),
            Error::InvalidStateTransition { .. } => ApiError::conflict(err.to_string()),
            Error::Io(_) | Error::IoPath { .. } => {
                tracing::error!("IO error: {}", err);
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
