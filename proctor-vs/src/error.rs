//! Error types for proctor-vs HTTP handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::{CloseError, HeartbeatError, IntakeError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Image missing or undecodable (400)
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Backpressure or dependency outage (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Verification queue full (503)
    #[error("{0}")]
    QueueSaturated(String),

    /// Close could not drain in time (504)
    #[error("{0}")]
    DrainTimeout(String),

    /// Report could not be rendered (500)
    #[error("{0}")]
    RenderFailure(String),

    /// Report could not be indexed (500)
    #[error("{0}")]
    Persistence(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// proctor-common error
    #[error("Common error: {0}")]
    Common(#[from] proctor_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg),
            ApiError::InvalidImage(msg) => (StatusCode::BAD_REQUEST, "INVALID_IMAGE", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DEPENDENCY_UNAVAILABLE",
                msg,
            ),
            ApiError::QueueSaturated(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_SATURATED", msg)
            }
            ApiError::DrainTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "DRAIN_TIMEOUT", msg),
            ApiError::RenderFailure(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "RENDER_FAILURE", msg)
            }
            ApiError::Persistence(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(proctor_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(proctor_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::InvalidInput(msg) => ApiError::BadRequest(msg),
            IntakeError::InvalidImage(msg) => ApiError::InvalidImage(msg),
            e @ IntakeError::QueueSaturated { .. } => ApiError::QueueSaturated(e.to_string()),
            IntakeError::TransientDependencyFailure(msg) => ApiError::Unavailable(msg),
        }
    }
}

impl From<HeartbeatError> for ApiError {
    fn from(err: HeartbeatError) -> Self {
        match err {
            HeartbeatError::InvalidInput(msg) => ApiError::BadRequest(msg),
            HeartbeatError::TransientDependencyFailure(msg) => ApiError::Unavailable(msg),
        }
    }
}

impl From<CloseError> for ApiError {
    fn from(err: CloseError) -> Self {
        match err {
            e @ CloseError::DrainTimeout { .. } => ApiError::DrainTimeout(e.to_string()),
            e @ CloseError::RenderFailure { .. } => ApiError::RenderFailure(e.to_string()),
            e @ CloseError::Persistence { .. } => ApiError::Persistence(e.to_string()),
            e @ CloseError::UnknownSession(_) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
