//! # Store Errors
//!
//! Every store operation returns [`StoreError`]. Backend failures keep their
//! `redb` source; domain refusals (duplicate job, existing config, active
//! storage) carry enough context for the RPC layer to map them onto an
//! [`ErrorKind`].

use pow_core::{ErrorKind, JobId, PowError, StateError};
use thiserror::Error;

/// Errors from the durable stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database file could not be opened or created.
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// A read or write transaction could not be started.
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// The key-value table could not be opened.
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    /// Low-level storage I/O failed.
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// A write transaction failed to commit.
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// The backend refused the operation for a reason of its own.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A stored value did not decode, or a value did not encode.
    #[error("codec error for key '{key}': {source}")]
    Codec {
        /// Key of the offending record.
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// `enqueue` was called with an id that is already stored.
    #[error("job {0} already exists")]
    DuplicateJob(JobId),

    /// No job with this id.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// A record other than a job was not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A config is stored for the key and override was not requested.
    #[error("storage config for {0} already exists")]
    AlreadyExists(String),

    /// Removal was refused because a tier is still enabled.
    #[error("{0} is still active in storage; apply a config with both tiers disabled first")]
    ActiveInStorage(String),

    /// A list page token did not parse.
    #[error("invalid page token '{0}'")]
    InvalidPageToken(String),

    /// A job status transition was rejected.
    #[error(transparent)]
    Transition(#[from] StateError),
}

impl StoreError {
    /// The externally visible kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::JobNotFound(_) | Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) | Self::DuplicateJob(_) => ErrorKind::AlreadyExists,
            Self::ActiveInStorage(_) => ErrorKind::ActiveInStorage,
            Self::InvalidPageToken(_) => ErrorKind::InvalidArgument,
            Self::Unavailable(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for PowError {
    fn from(err: StoreError) -> Self {
        PowError::new(err.kind(), err.to_string())
    }
}
