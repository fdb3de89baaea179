//! Error types for every component boundary.
//!
//! One `thiserror`-derived enum per component, following the shape of the
//! teacher's single framework-wide `ActonHtmxError`: one enum, one
//! `#[error(...)]` string per variant, `#[from]` for wrapped causes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors from the durable job registry.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `put` was called with a name that already exists.
    #[error("job name already in use: {0}")]
    NameInUse(String),
    /// `replace`/`remove`/`get` targeted a name that does not exist.
    #[error("job not found: {0}")]
    NotFound(String),
    /// Underlying disk I/O or (de)serialization failure.
    #[error("storage error: {0}")]
    Io(String),
}

/// Errors from fetching input data (spec.md §4.2).
#[derive(Debug, Error)]
pub enum FetchError {
    /// Worth retrying: network hiccup, 5xx, temporary file unavailability.
    #[error("transient fetch error: {0}")]
    Transient(String),
    /// Not worth retrying: parse error, 4xx, malformed source config.
    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

/// Errors from evaluating a job's transform (spec.md §4.3).
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The evaluation did not complete within the hard deadline.
    #[error("sandbox timed out")]
    Timeout,
    /// The transform raised an error during evaluation.
    #[error("transform failed: {cause}")]
    Transform {
        /// Human-readable cause, suitable for inclusion in a failure notice.
        cause: String,
    },
    /// Evaluation completed but did not produce a table result.
    #[error("transform did not produce a table result")]
    BadResult,
}

/// Errors from email delivery (spec.md §4.4).
#[derive(Debug, Error)]
pub enum MailError {
    /// Worth retrying: connection reset, 4xx greylisting, timeout.
    #[error("transient mail error: {0}")]
    Transient(String),
    /// Not worth retrying: auth failure, invalid recipient (5xx).
    #[error("permanent mail error: {0}")]
    Permanent(String),
}

/// HTTP-facing error type for the Control API (spec.md §6/§7).
///
/// Maps component errors to the status codes the Control API contract
/// promises, rather than hand-matching at every handler call site.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request failed input validation.
    #[error("validation error: {0}")]
    Validation(String),
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request conflicts with in-progress state (e.g. a test run
    /// against a job that is already executing).
    #[error("conflict: {0}")]
    Conflict(String),
    /// An internal/storage failure occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NameInUse(name) => Self::Validation(format!("name in use: {name}")),
            StoreError::NotFound(name) => Self::NotFound(name),
            StoreError::Io(msg) => Self::Internal(msg),
        }
    }
}

impl From<crate::scheduler::ScheduleError> for ApiError {
    fn from(err: crate::scheduler::ScheduleError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<crate::scheduler::RunNowError> for ApiError {
    fn from(err: crate::scheduler::RunNowError) -> Self {
        match err {
            crate::scheduler::RunNowError::NotFound(name) => Self::NotFound(name),
            crate::scheduler::RunNowError::AlreadyRunning => {
                Self::Conflict("job is already running".to_string())
            }
            crate::scheduler::RunNowError::PreviewFailed { stage, message } => {
                Self::Internal(format!("{stage} failed: {message}"))
            }
        }
    }
}

impl From<crate::uploads::UploadError> for ApiError {
    fn from(err: crate::uploads::UploadError) -> Self {
        match err {
            crate::uploads::UploadError::InvalidFilename => {
                Self::Validation("invalid filename".to_string())
            }
            crate::uploads::UploadError::Io(io_err) => Self::Internal(io_err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
