//! # Storage Configs
//!
//! A [`StorageConfig`] is the declarative intent for one cid: whether the
//! data lives in the hot tier, how many cold-tier deals back it, under which
//! wallet, and whether the periodic reconciler may repair or renew it.
//!
//! [`StorageConfig::validate`] enforces the structural rules. Ownership of
//! `cold.filecoin.addr` is checked by the engine, which knows the profile.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ChainEpoch;

/// Shortest accepted deal duration: 180 days of 30-second epochs.
pub const MIN_DEAL_DURATION: ChainEpoch = 518_400;

/// Declarative storage intent for a cid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Hot tier settings.
    pub hot: HotConfig,
    /// Cold tier settings.
    pub cold: ColdConfig,
    /// Whether the reconciler restores lost replication.
    #[serde(default)]
    pub repairable: bool,
}

/// Hot (IPFS) tier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotConfig {
    pub enabled: bool,
    /// Allow retrieving from the cold tier when the hot tier cannot find the data.
    #[serde(default)]
    pub allow_unfreeze: bool,
    /// Maximum total price accepted for an unfreeze retrieval. Zero means no limit.
    #[serde(default)]
    pub unfreeze_max_price: u64,
    pub ipfs: IpfsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// Seconds allowed for pinning or staging.
    pub add_timeout_s: u64,
}

/// Cold (Filecoin) tier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdConfig {
    pub enabled: bool,
    pub filecoin: FilConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilConfig {
    /// Target number of miners holding an active deal.
    pub rep_factor: u32,
    /// Deal duration in epochs.
    pub deal_min_duration: ChainEpoch,
    /// Paying wallet address.
    pub addr: String,
    /// Allow-list of ISO 3166 alpha-2 codes. Empty allows all.
    #[serde(default)]
    pub country_codes: Vec<String>,
    #[serde(default)]
    pub excluded_miners: Vec<String>,
    /// When non-empty, only these miners are used, in this order.
    #[serde(default)]
    pub trusted_miners: Vec<String>,
    #[serde(default)]
    pub renew: FilRenew,
    /// Maximum epoch price per deal. Zero means no limit.
    #[serde(default)]
    pub max_price: u64,
    #[serde(default)]
    pub fast_retrieval: bool,
    /// Epochs between proposal and deal start.
    #[serde(default)]
    pub deal_start_offset: ChainEpoch,
}

/// Renewal policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilRenew {
    pub enabled: bool,
    /// Renew when fewer than this many epochs remain.
    pub threshold: ChainEpoch,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            hot: HotConfig {
                enabled: true,
                allow_unfreeze: false,
                unfreeze_max_price: 0,
                ipfs: IpfsConfig { add_timeout_s: 30 },
            },
            cold: ColdConfig {
                enabled: true,
                filecoin: FilConfig {
                    rep_factor: 1,
                    deal_min_duration: MIN_DEAL_DURATION,
                    addr: String::new(),
                    country_codes: Vec::new(),
                    excluded_miners: Vec::new(),
                    trusted_miners: Vec::new(),
                    renew: FilRenew::default(),
                    max_price: 0,
                    fast_retrieval: true,
                    deal_start_offset: 0,
                },
            },
            repairable: false,
        }
    }
}

impl StorageConfig {
    /// A copy of this config with both tiers disabled.
    ///
    /// Applying it is the precondition for removing a cid.
    pub fn disabled(&self) -> Self {
        let mut cfg = self.clone();
        cfg.hot.enabled = false;
        cfg.cold.enabled = false;
        cfg.repairable = false;
        cfg
    }

    pub fn with_hot_enabled(mut self, enabled: bool) -> Self {
        self.hot.enabled = enabled;
        self
    }

    pub fn with_cold_enabled(mut self, enabled: bool) -> Self {
        self.cold.enabled = enabled;
        self
    }

    pub fn with_rep_factor(mut self, rep_factor: u32) -> Self {
        self.cold.filecoin.rep_factor = rep_factor;
        self
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.cold.filecoin.addr = addr.into();
        self
    }

    pub fn with_renew(mut self, threshold: ChainEpoch) -> Self {
        self.cold.filecoin.renew = FilRenew {
            enabled: true,
            threshold,
        };
        self
    }

    pub fn with_trusted_miners(mut self, miners: Vec<String>) -> Self {
        self.cold.filecoin.trusted_miners = miners;
        self
    }

    pub fn with_repairable(mut self, repairable: bool) -> Self {
        self.repairable = repairable;
        self
    }

    /// Whether both tiers are off.
    pub fn is_disabled(&self) -> bool {
        !self.hot.enabled && !self.cold.enabled
    }

    /// Whether the reconciler tracks this config.
    pub fn is_tracked(&self) -> bool {
        self.cold.enabled && (self.repairable || self.cold.filecoin.renew.enabled)
    }

    /// Check the structural rules of the config.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hot.enabled && self.hot.ipfs.add_timeout_s == 0 {
            return Err(invalid("hot.ipfs.add_timeout_s", "must be greater than zero"));
        }
        if !self.cold.enabled {
            return Ok(());
        }
        let fil = &self.cold.filecoin;
        if fil.rep_factor == 0 {
            return Err(invalid("cold.filecoin.rep_factor", "must be at least 1"));
        }
        if fil.deal_min_duration < MIN_DEAL_DURATION {
            return Err(invalid(
                "cold.filecoin.deal_min_duration",
                format!("must be at least {MIN_DEAL_DURATION} epochs"),
            ));
        }
        if fil.addr.is_empty() {
            return Err(invalid("cold.filecoin.addr", "must not be empty"));
        }
        if fil.deal_start_offset < 0 {
            return Err(invalid("cold.filecoin.deal_start_offset", "must not be negative"));
        }
        if fil.renew.enabled {
            if fil.renew.threshold <= 0 {
                return Err(invalid(
                    "cold.filecoin.renew.threshold",
                    "must be greater than zero",
                ));
            }
            if !self.hot.enabled {
                return Err(invalid(
                    "cold.filecoin.renew.enabled",
                    "requires hot storage to be enabled",
                ));
            }
        }
        if fil
            .excluded_miners
            .iter()
            .chain(fil.trusted_miners.iter())
            .any(|m| m.trim().is_empty())
        {
            return Err(invalid("cold.filecoin miners", "must not contain empty addresses"));
        }
        if let Some(code) = fil
            .country_codes
            .iter()
            .find(|c| c.len() != 2 || !c.chars().all(|ch| ch.is_ascii_uppercase()))
        {
            return Err(invalid(
                "cold.filecoin.country_codes",
                format!("'{code}' is not an ISO 3166 alpha-2 code"),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}
