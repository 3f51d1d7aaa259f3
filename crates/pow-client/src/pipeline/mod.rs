//! # Bulk pipeline
//!
//! Drives a folder of local items through stage → apply → watch against a
//! Powergate server, one task per top-level entry.
//!
//! ## Stages
//!
//! ```text
//! INIT → STAGING → STAGING_COMPLETE → PUSHING → PUSH_COMPLETE
//!      → DEAL_STARTING → DEAL_QUEUED → DEAL_EXECUTING → DEAL_COMPLETE → COMPLETE
//! ```
//!
//! Dry runs end in `DRY_RUN_COMPLETE`. A task that fails keeps its stage
//! and records `error`.
//!
//! ## Flow control
//!
//! | Mechanism | Behavior |
//! |---|---|
//! | [`StagingLimit`] | Bytes reserved from admission until the deal completes or fails |
//! | Ready backoff | 1s doubling, capped at 60s, while the budget is full |
//! | Summary watcher | One poll for all pushed tasks; 2s doubling on empty sweeps, capped at 2min (5min on mainnet) |
//!
//! The [`ResultsFile`] is rewritten after every task update, so a killed
//! run can be resumed with [`Pipeline::resume`].

pub mod backend;
pub mod budget;
pub mod results;
pub mod runner;
pub mod task;

use std::path::PathBuf;
use std::time::Duration;

use pow_core::StorageConfig;

pub use backend::PipelineBackend;
pub use budget::StagingLimit;
pub use results::ResultsFile;
pub use runner::{Pipeline, PipelineReport};
pub use task::{merge, scan_folder, Task, TaskStage};

use crate::error::ClientError;

/// Errors that stop a pipeline run or fail a single task.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    Config(String),

    #[error("item of {bytes} bytes exceeds the limit of {max} bytes")]
    TooLarge { bytes: u64, max: u64 },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("results file {}: {source}", .path.display())]
    Results {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("results file {} is not valid: {source}", .path.display())]
    ResultsFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// The delay after `current`.
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

pub const READY_BACKOFF: Backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
pub const WATCH_BACKOFF: Backoff =
    Backoff::new(Duration::from_secs(2), Duration::from_secs(2 * 60));
const MAINNET_WATCH_CAP: Duration = Duration::from_secs(5 * 60);

const GIB: u64 = 1 << 30;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Budget for bytes between admission and deal completion.
    pub max_staged_bytes: u64,
    /// Largest item that fits one deal.
    pub max_deal_bytes: u64,
    /// Used when a task carries no config of its own. `None` defers to the
    /// profile default on the server.
    pub storage_config: Option<StorageConfig>,
    pub dry_run: bool,
    /// Apply configs with the hot tier disabled.
    pub disable_hot: bool,
    pub ready_backoff: Backoff,
    pub watch_backoff: Backoff,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_staged_bytes: 64 * GIB,
            max_deal_bytes: 32 * GIB,
            storage_config: None,
            dry_run: false,
            disable_hot: false,
            ready_backoff: READY_BACKOFF,
            watch_backoff: WATCH_BACKOFF,
        }
    }
}

impl PipelineConfig {
    /// Slower summary polling for mainnet block times.
    pub fn with_mainnet(mut self, mainnet: bool) -> Self {
        if mainnet {
            self.watch_backoff.max = MAINNET_WATCH_CAP;
        }
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_deal_bytes == 0 {
            return Err(PipelineError::Config("max deal bytes must be positive".into()));
        }
        if self.max_staged_bytes < self.max_deal_bytes {
            return Err(PipelineError::Config(format!(
                "max staged bytes ({}) must be at least max deal bytes ({})",
                self.max_staged_bytes, self.max_deal_bytes
            )));
        }
        if let Some(cfg) = &self.storage_config {
            cfg.validate()
                .map_err(|e| PipelineError::Config(format!("storage config: {e}")))?;
        }
        Ok(())
    }
}
