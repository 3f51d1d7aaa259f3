//! Engine tuning knobs.

use std::time::Duration;

use pow_core::StorageConfig;

/// Scheduler, executor, and reconciler settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker tasks running jobs concurrently.
    pub max_parallel: usize,
    /// Upper bound on how long an idle worker sleeps before re-checking
    /// the queue.
    pub poll_interval: Duration,
    /// Time allowed for proposed deals to become active within one job.
    pub deal_finality_timeout: Duration,
    /// Retries of a capability call failing with an infrastructure error.
    pub infra_retries: u32,
    /// First retry delay; doubles on every retry.
    pub infra_backoff: Duration,
    /// Attempts at persisting a job's terminal state.
    pub finish_attempts: u32,
    /// Period of the reconciler sweep.
    pub reconcile_interval: Duration,
    /// Selection rounds when deals fail and replication falls short.
    pub max_deal_rounds: u32,
    /// Default config for newly created profiles. Its `addr` is replaced
    /// by the profile's first address.
    pub default_storage_config: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 10,
            poll_interval: Duration::from_secs(1),
            deal_finality_timeout: Duration::from_secs(48 * 60 * 60),
            infra_retries: 3,
            infra_backoff: Duration::from_millis(200),
            finish_attempts: 3,
            reconcile_interval: Duration::from_secs(12 * 60 * 60),
            max_deal_rounds: 2,
            default_storage_config: StorageConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    pub fn with_poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    pub fn with_deal_finality_timeout(mut self, d: Duration) -> Self {
        self.deal_finality_timeout = d;
        self
    }

    pub fn with_infra_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.infra_retries = retries;
        self.infra_backoff = backoff;
        self
    }

    pub fn with_reconcile_interval(mut self, d: Duration) -> Self {
        self.reconcile_interval = d;
        self
    }

    pub fn with_default_storage_config(mut self, config: StorageConfig) -> Self {
        self.default_storage_config = config;
        self
    }
}
