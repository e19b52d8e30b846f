use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hr_platform::PlatformError;
use serde::Serialize;
use tracing::error;

/// Standard API error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Platform(PlatformError),
}

impl From<PlatformError> for ApiError {
    fn from(e: PlatformError) -> Self {
        ApiError::Platform(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", message),
            ApiError::Platform(e) => match &e {
                PlatformError::Validation { .. } | PlatformError::InvalidFilter { .. } => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                PlatformError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
                PlatformError::Duplicate { .. } => (StatusCode::CONFLICT, "DUPLICATE", e.to_string()),
                _ => {
                    error!(error = %e, "Request failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
                }
            },
        };
        (status, Json(ErrorBody { error: code.to_string(), message })).into_response()
    }
}
