//! HTTP request handlers.
//!
//! Error responses share one shape, `{"error": {"code", "message"}}`, where
//! `code` is a stable machine-readable string.

pub mod callbacks;
pub mod health;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
pub use callbacks::receive_callback;
pub use health::{health_check, readiness_check};
use serde::Serialize;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// Creates a standardized error response.
pub(crate) fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail { code: code.to_string(), message: message.into() },
    };

    (status, Json(body)).into_response()
}
