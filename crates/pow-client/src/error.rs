//! Client error types.

use std::path::PathBuf;

use pow_core::ErrorKind;

/// Errors from Powergate API calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport error.
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("{endpoint} returned {status} {kind}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        kind: ErrorKind,
        message: String,
    },

    /// Response deserialization failed.
    #[error("failed to deserialize response from {endpoint}: {source}")]
    Deserialization {
        endpoint: String,
        source: reqwest::Error,
    },

    /// A streamed line was not valid JSON for the expected type.
    #[error("invalid stream item from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// The server address could not be used as a base URL.
    #[error("invalid server address {0:?}")]
    InvalidUrl(String),

    /// Reading local data failed.
    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ClientError {
    /// The error kind the server reported, or `INFRASTRUCTURE` for
    /// transport failures and `INTERNAL` for everything else.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { kind, .. } => *kind,
            Self::Http { .. } => ErrorKind::Infrastructure,
            _ => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
