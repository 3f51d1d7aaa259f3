//! # Error Types
//!
//! Defines the error vocabulary shared across Powergate. All errors use
//! `thiserror` for derive-based `Display` and `Error` implementations.
//!
//! ## Design
//!
//! - [`ErrorKind`] is the closed set of externally visible failure kinds.
//!   The RPC layer maps each kind to a status code; the executor records the
//!   kind's code as a job's `error_cause` prefix.
//! - [`ValidationError`] covers malformed input (content ids, configs).
//! - [`StateError`] covers rejected job status transitions.

use thiserror::Error;

/// Externally visible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed cid, negative limit, invalid storage config.
    InvalidArgument,
    /// No config, info, job, or profile for the key.
    NotFound,
    /// A config exists and `override` was not requested.
    AlreadyExists,
    /// Missing token.
    Unauthenticated,
    /// Wrong token.
    PermissionDenied,
    /// `Remove` on a cid that still has hot or cold storage enabled.
    ActiveInStorage,
    /// Retrieval price above the configured unfreeze maximum.
    UnfreezePriceExceeded,
    /// The replication factor could not be reached.
    PartialColdReplication,
    /// A deal did not reach finality in time.
    DealTimedOut,
    /// An explicit cancel was observed.
    Canceled,
    /// Back-end unavailable or transient network failure.
    Infrastructure,
    /// Anything else. Never surfaced to clients verbatim.
    Internal,
}

impl ErrorKind {
    /// Machine-readable code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ActiveInStorage => "ACTIVE_IN_STORAGE",
            Self::UnfreezePriceExceeded => "UNFREEZE_PRICE_EXCEEDED",
            Self::PartialColdReplication => "PARTIAL_COLD_REPLICATION",
            Self::DealTimedOut => "DEAL_TIMED_OUT",
            Self::Canceled => "CANCELED",
            Self::Infrastructure => "INFRASTRUCTURE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Parse a machine-readable code back into a kind.
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "NOT_FOUND" => Self::NotFound,
            "ALREADY_EXISTS" => Self::AlreadyExists,
            "UNAUTHENTICATED" => Self::Unauthenticated,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "ACTIVE_IN_STORAGE" => Self::ActiveInStorage,
            "UNFREEZE_PRICE_EXCEEDED" => Self::UnfreezePriceExceeded,
            "PARTIAL_COLD_REPLICATION" => Self::PartialColdReplication,
            "DEAL_TIMED_OUT" => Self::DealTimedOut,
            "CANCELED" => Self::Canceled,
            "INFRASTRUCTURE" => Self::Infrastructure,
            "INTERNAL" => Self::Internal,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Error crossing crate boundaries: a kind plus a human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PowError {
    /// What went wrong, in the closed vocabulary.
    pub kind: ErrorKind,
    /// Details for humans.
    pub message: String,
}

impl PowError {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether this error has the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<ValidationError> for PowError {
    fn from(err: ValidationError) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

impl From<StateError> for PowError {
    fn from(err: StateError) -> Self {
        Self::internal(err.to_string())
    }
}

/// Malformed input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The string is not a canonical base-32 content id.
    #[error("invalid cid '{0}'")]
    InvalidCid(String),

    /// The string is not a valid identifier.
    #[error("invalid identifier '{0}'")]
    InvalidId(String),

    /// A storage config field violates its constraint.
    #[error("invalid storage config: {field} {reason}")]
    InvalidConfig {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What the constraint requires.
        reason: String,
    },
}

/// Rejected job status transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The lattice does not allow this transition.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current status name.
        from: String,
        /// Attempted target status name.
        to: String,
        /// Reason the transition was rejected.
        reason: String,
    },

    /// The job already reached a terminal status.
    #[error("job {id} is already terminal in status {status}")]
    AlreadyTerminal {
        /// The job.
        id: String,
        /// Its terminal status.
        status: String,
    },
}
