//! API error handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API error type. Every handler returns `Result<_, ApiError>`; this is the
/// single place that maps domain errors onto HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({ "message": message }));
        (status, body).into_response()
    }
}

impl From<jobrunner_core::Error> for ApiError {
    fn from(err: jobrunner_core::Error) -> Self {
        match err {
            jobrunner_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            jobrunner_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            jobrunner_core::Error::ExecutionFailed(_) | jobrunner_core::Error::Internal(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<jobrunner_store::StoreError> for ApiError {
    fn from(err: jobrunner_store::StoreError) -> Self {
        match err {
            jobrunner_store::StoreError::NotFound => ApiError::NotFound("Job not found".to_string()),
        }
    }
}
