//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps [`PowError`] kinds to HTTP status codes and returns JSON error
//! bodies with a machine-readable code and message. Internal failures and
//! unreachable back-ends are logged and never echoed to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pow_core::rpc::{ErrorBody, ErrorDetail};
use pow_core::{ErrorKind, PowError, ValidationError};
use thiserror::Error;

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed request or invalid argument (400).
    #[error("{0}")]
    BadRequest(String),

    /// Missing credentials (401).
    #[error("{0}")]
    Unauthenticated(String),

    /// Wrong credentials (403).
    #[error("{0}")]
    PermissionDenied(String),

    /// No resource for the key (404).
    #[error("{0}")]
    NotFound(String),

    /// A config already exists and override was not requested (409).
    #[error("{0}")]
    AlreadyExists(String),

    /// The cid still has hot or cold storage enabled (412).
    #[error("{0}")]
    ActiveInStorage(String),

    /// A back-end is unreachable (503). Message is logged but not returned.
    #[error("{0}")]
    Unavailable(String),

    /// Anything else (500). Message is logged but not returned to client.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorKind::InvalidArgument.code()),
            Self::Unauthenticated(_) => {
                (StatusCode::UNAUTHORIZED, ErrorKind::Unauthenticated.code())
            }
            Self::PermissionDenied(_) => {
                (StatusCode::FORBIDDEN, ErrorKind::PermissionDenied.code())
            }
            Self::NotFound(_) => (StatusCode::NOT_FOUND, ErrorKind::NotFound.code()),
            Self::AlreadyExists(_) => (StatusCode::CONFLICT, ErrorKind::AlreadyExists.code()),
            Self::ActiveInStorage(_) => (
                StatusCode::PRECONDITION_FAILED,
                ErrorKind::ActiveInStorage.code(),
            ),
            Self::Unavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Infrastructure.code(),
            ),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal.code()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                "An internal error occurred".to_string()
            }
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "back-end unavailable");
                "A storage back-end is temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<PowError> for AppError {
    fn from(err: PowError) -> Self {
        let PowError { kind, message } = err;
        match kind {
            ErrorKind::InvalidArgument => Self::BadRequest(message),
            ErrorKind::Unauthenticated => Self::Unauthenticated(message),
            ErrorKind::PermissionDenied => Self::PermissionDenied(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::AlreadyExists => Self::AlreadyExists(message),
            ErrorKind::ActiveInStorage => Self::ActiveInStorage(message),
            ErrorKind::Infrastructure => Self::Unavailable(message),
            other => Self::Internal(format!("{other}: {message}")),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
