//! Devnet setup errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DevnetError {
    /// A miner spec string could not be parsed.
    #[error("invalid miner spec {spec:?}: {reason}")]
    InvalidMiner { spec: String, reason: String },

    #[error("duplicate miner {0}")]
    DuplicateMiner(String),
}
