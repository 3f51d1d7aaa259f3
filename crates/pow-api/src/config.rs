//! # Server Configuration
//!
//! `powd` reads its settings from `POW_*` environment variables. Every
//! variable is optional; absent ones fall back to the defaults below.
//!
//! | Variable | Default |
//! |---|---|
//! | `POW_LISTEN_ADDR` | `127.0.0.1:6002` |
//! | `POW_DATA_DIR` | unset: in-memory datastore |
//! | `POW_ADMIN_TOKEN` | unset: admin routes open |
//! | `POW_MAX_PARALLEL` | `10` |
//! | `POW_RECONCILE_INTERVAL_SECS` | `43200` |
//! | `POW_DEAL_FINALITY_TIMEOUT_SECS` | `172800` |
//! | `POW_DEVNET_MINERS` | `f01000,f01001` |
//! | `POW_DEVNET_BLOCK_MS` | `100` |
//! | `POW_DEFAULT_REP_FACTOR` | `1` |
//! | `POW_DEFAULT_DEAL_DURATION` | `518400` |
//! | `POW_MAX_STAGE_BYTES` | `268435456` |
//! | `POW_METRICS` | `true` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pow_core::{ChainEpoch, StorageConfig, MIN_DEAL_DURATION};
use pow_devnet::{DevnetConfig, MinerSpec};
use pow_engine::EngineConfig;
use thiserror::Error;

/// Errors from reading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// `powd` settings.
///
/// Custom `Debug` redacts the admin token.
#[derive(Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Directory holding the redb file. `None` keeps all state in memory.
    pub data_dir: Option<PathBuf>,
    /// Token required on admin routes. `None` leaves them open.
    pub admin_token: Option<String>,
    pub max_parallel: usize,
    pub reconcile_interval: Duration,
    pub deal_finality_timeout: Duration,
    pub devnet_miners: Vec<MinerSpec>,
    pub devnet_block_time: Duration,
    pub default_rep_factor: u32,
    pub default_deal_duration: ChainEpoch,
    /// Largest accepted staging request body.
    pub max_stage_bytes: usize,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("data_dir", &self.data_dir)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .field("max_parallel", &self.max_parallel)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("deal_finality_timeout", &self.deal_finality_timeout)
            .field("devnet_miners", &self.devnet_miners.len())
            .field("devnet_block_time", &self.devnet_block_time)
            .field("default_rep_factor", &self.default_rep_factor)
            .field("default_deal_duration", &self.default_deal_duration)
            .field("max_stage_bytes", &self.max_stage_bytes)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 6002)),
            data_dir: None,
            admin_token: None,
            max_parallel: engine.max_parallel,
            reconcile_interval: engine.reconcile_interval,
            deal_finality_timeout: engine.deal_finality_timeout,
            devnet_miners: DevnetConfig::default().miners,
            devnet_block_time: Duration::from_millis(100),
            default_rep_factor: 1,
            default_deal_duration: MIN_DEAL_DURATION,
            max_stage_bytes: 256 * 1024 * 1024,
            metrics_enabled: true,
        }
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl ServerConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("POW_LISTEN_ADDR") {
            cfg.listen = parse("POW_LISTEN_ADDR", &v)?;
        }
        cfg.data_dir = get("POW_DATA_DIR").map(PathBuf::from);
        cfg.admin_token = get("POW_ADMIN_TOKEN");
        if let Some(v) = get("POW_MAX_PARALLEL") {
            cfg.max_parallel = parse("POW_MAX_PARALLEL", &v)?;
            if cfg.max_parallel == 0 {
                return Err(ConfigError::Invalid {
                    var: "POW_MAX_PARALLEL",
                    value: v,
                    reason: "must be at least 1".into(),
                });
            }
        }
        if let Some(v) = get("POW_RECONCILE_INTERVAL_SECS") {
            cfg.reconcile_interval =
                Duration::from_secs(parse("POW_RECONCILE_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("POW_DEAL_FINALITY_TIMEOUT_SECS") {
            cfg.deal_finality_timeout =
                Duration::from_secs(parse("POW_DEAL_FINALITY_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("POW_DEVNET_MINERS") {
            cfg.devnet_miners =
                DevnetConfig::parse_miners(&v).map_err(|e| ConfigError::Invalid {
                    var: "POW_DEVNET_MINERS",
                    value: v.clone(),
                    reason: e.to_string(),
                })?;
        }
        if let Some(v) = get("POW_DEVNET_BLOCK_MS") {
            cfg.devnet_block_time = Duration::from_millis(parse("POW_DEVNET_BLOCK_MS", &v)?);
        }
        if let Some(v) = get("POW_DEFAULT_REP_FACTOR") {
            cfg.default_rep_factor = parse("POW_DEFAULT_REP_FACTOR", &v)?;
        }
        if let Some(v) = get("POW_DEFAULT_DEAL_DURATION") {
            cfg.default_deal_duration = parse("POW_DEFAULT_DEAL_DURATION", &v)?;
        }
        if let Some(v) = get("POW_MAX_STAGE_BYTES") {
            cfg.max_stage_bytes = parse("POW_MAX_STAGE_BYTES", &v)?;
        }
        if let Some(v) = get("POW_METRICS") {
            cfg.metrics_enabled = parse("POW_METRICS", &v)?;
        }

        if cfg.default_rep_factor == 0 {
            return Err(ConfigError::Invalid {
                var: "POW_DEFAULT_REP_FACTOR",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if cfg.default_deal_duration < MIN_DEAL_DURATION {
            return Err(ConfigError::Invalid {
                var: "POW_DEFAULT_DEAL_DURATION",
                value: cfg.default_deal_duration.to_string(),
                reason: format!("must be at least {MIN_DEAL_DURATION} epochs"),
            });
        }
        Ok(cfg)
    }

    /// Default storage config given to new profiles.
    pub fn default_storage_config(&self) -> StorageConfig {
        let mut config = StorageConfig::default();
        config.cold.filecoin.rep_factor = self.default_rep_factor;
        config.cold.filecoin.deal_min_duration = self.default_deal_duration;
        config
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_max_parallel(self.max_parallel)
            .with_reconcile_interval(self.reconcile_interval)
            .with_deal_finality_timeout(self.deal_finality_timeout)
            .with_default_storage_config(self.default_storage_config())
    }

    pub fn devnet_config(&self) -> DevnetConfig {
        DevnetConfig::default()
            .with_miners(self.devnet_miners.clone())
            .with_block_time(self.devnet_block_time)
    }
}
