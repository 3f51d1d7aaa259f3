//! # pow-devnet — In-Process Back-Ends
//!
//! Implementations of the engine's capability traits that need no external
//! node, for development servers and end-to-end tests:
//!
//! - [`MemoryHot`]: blockstore with pins and staged-block retention.
//! - [`SimulatedCold`]: chain height, miners, and a deal state machine.
//! - [`DevWallet`]: ed25519 keys and balance counters.
//!
//! [`Devnet`] wires the three together with a [`ScoredMinerSelector`] fed
//! from the simulated miners' asks.

pub mod cold;
pub mod error;
pub mod hot;
pub mod wallet;

use std::sync::Arc;
use std::time::Duration;

use pow_core::ChainEpoch;
use pow_engine::{Capabilities, ScoredMinerSelector};
use tokio::task::JoinHandle;

pub use cold::{MinerBehavior, MinerSpec, SimulatedCold, DEFAULT_ACTIVATION_EPOCHS};
pub use error::DevnetError;
pub use hot::MemoryHot;
pub use wallet::DevWallet;

/// Devnet parameters.
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    pub miners: Vec<MinerSpec>,
    pub start_height: ChainEpoch,
    pub activation_epochs: ChainEpoch,
    /// Wall time of one epoch when the chain runs on its own.
    pub block_time: Duration,
    pub staged_ttl: Duration,
    pub initial_balance: u64,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            miners: vec![MinerSpec::new("f01000"), MinerSpec::new("f01001")],
            start_height: cold::DEFAULT_START_HEIGHT,
            activation_epochs: DEFAULT_ACTIVATION_EPOCHS,
            block_time: Duration::from_millis(100),
            staged_ttl: hot::DEFAULT_STAGED_TTL,
            initial_balance: wallet::DEFAULT_INITIAL_BALANCE,
        }
    }
}

impl DevnetConfig {
    pub fn with_miners(mut self, miners: Vec<MinerSpec>) -> Self {
        self.miners = miners;
        self
    }

    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = block_time;
        self
    }

    /// Parse a comma-separated list of miner specs.
    pub fn parse_miners(list: &str) -> Result<Vec<MinerSpec>, DevnetError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

/// A complete set of in-process back-ends.
#[derive(Debug, Clone)]
pub struct Devnet {
    pub hot: Arc<MemoryHot>,
    pub cold: Arc<SimulatedCold>,
    pub wallet: Arc<DevWallet>,
    pub selector: Arc<ScoredMinerSelector>,
    config: DevnetConfig,
}

impl Devnet {
    pub fn new(config: DevnetConfig) -> Result<Self, DevnetError> {
        let hot = Arc::new(MemoryHot::new(config.staged_ttl));
        let cold = Arc::new(SimulatedCold::new(
            config.miners.clone(),
            Arc::clone(&hot),
            config.start_height,
            config.activation_epochs,
        )?);
        let selector = Arc::new(ScoredMinerSelector::with_asks(cold.asks()));
        Ok(Self {
            hot,
            cold,
            wallet: Arc::new(DevWallet::new(config.initial_balance)),
            selector,
            config,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            hot: self.hot.clone(),
            cold: self.cold.clone(),
            selector: self.selector.clone(),
            wallet: self.wallet.clone(),
        }
    }

    /// Reload the selector's index from the current miner asks.
    pub fn refresh_asks(&self) {
        self.selector.refresh(self.cold.asks());
    }

    /// Start the chain clock, staged-block collection, and ask refreshes.
    /// The tasks stop when the returned handles are aborted.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let block_time = self.config.block_time.max(Duration::from_millis(1));
        let refresh = {
            let devnet = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(block_time.saturating_mul(100));
                loop {
                    ticker.tick().await;
                    devnet.refresh_asks();
                }
            })
        };
        tracing::info!(
            miners = self.config.miners.len(),
            ?block_time,
            "devnet started"
        );
        vec![
            self.cold.spawn_chain(block_time),
            self.hot.spawn_gc(self.config.staged_ttl.clamp(Duration::from_secs(1), Duration::from_secs(60))),
            refresh,
        ]
    }
}
