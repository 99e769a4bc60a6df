//! Error types for intake-svc
//!
//! `IntakeError` covers orchestrator operations; `ApiError` is the HTTP
//! rendering of any failure.

use crate::models::TransitionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use intake_common::events::FileState;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Orchestrator operation error
#[derive(Debug, Error)]
pub enum IntakeError {
    /// No file with this id is registered
    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    /// State machine refused the transition
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Parsed files stay in their collection
    #[error("File {0} is already parsed and cannot be cancelled")]
    NotCancellable(Uuid),

    /// Retry requested for a file that has not failed
    #[error("File {file_id} is {state}; only failed files can be retried")]
    NotRetryable { file_id: Uuid, state: FileState },

    /// Reclassify requested for a file that is not parsed
    #[error("File {file_id} is {state}; only parsed files can be reclassified")]
    NotReclassifiable { file_id: Uuid, state: FileState },

    /// Caller's role may not submit uploads
    #[error("Role '{}' is not allowed to upload documents", .0.as_deref().unwrap_or("none"))]
    UploadNotPermitted(Option<String>),

    /// intake-common error
    #[error(transparent)]
    Common(#[from] intake_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Operation not allowed in the current file state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller lacks permission (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::FileNotFound(_) => ApiError::NotFound(err.to_string()),
            IntakeError::InvalidTransition(_)
            | IntakeError::NotCancellable(_)
            | IntakeError::NotRetryable { .. }
            | IntakeError::NotReclassifiable { .. } => ApiError::Conflict(err.to_string()),
            IntakeError::UploadNotPermitted(_) => ApiError::Forbidden(err.to_string()),
            IntakeError::Common(intake_common::Error::InvalidInput(msg)) => {
                ApiError::BadRequest(msg)
            }
            IntakeError::Common(other) => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
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

/// Result type for orchestrator operations
pub type IntakeResult<T> = Result<T, IntakeError>;

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
