//! # Capability Errors
//!
//! Failures reported by the hot tier, cold tier, miner selector, and wallet
//! back-ends. The executor retries [`CapabilityError::Infrastructure`] with
//! backoff; every other variant ends the current step.

use std::time::Duration;

use pow_core::{ErrorKind, PowError};
use thiserror::Error;

/// Errors from capability back-ends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The operation exceeded its deadline. Not retried.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The back-end is unavailable or a transient transport error occurred.
    #[error("infrastructure unavailable: {0}")]
    Infrastructure(String),

    /// A retrieval would cost more than allowed.
    #[error("price {price} exceeds maximum {max}")]
    PriceExceeded {
        /// Quoted total price.
        price: u64,
        /// Configured maximum.
        max: u64,
    },

    /// The cid, address, or deal is unknown to the back-end.
    #[error("not found: {0}")]
    NotFound(String),

    /// The back-end refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl CapabilityError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    /// The externally visible kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Infrastructure(_) => ErrorKind::Infrastructure,
            Self::PriceExceeded { .. } => ErrorKind::UnfreezePriceExceeded,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Rejected(_) => ErrorKind::InvalidArgument,
            Self::Timeout(_) => ErrorKind::Internal,
        }
    }

    /// Convert with a prefix naming the failed step.
    pub fn context(self, step: &str) -> PowError {
        PowError::new(self.kind(), format!("{step}: {self}"))
    }
}

impl From<CapabilityError> for PowError {
    fn from(err: CapabilityError) -> Self {
        PowError::new(err.kind(), err.to_string())
    }
}
