//! # Deal Types
//!
//! Values exchanged with the cold tier: miner proposals produced by a
//! selector, handles for submitted deals, state updates streamed while a deal
//! settles, and the deal records kept for history queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Cid;
use crate::info::FilStorage;
use crate::job::DealInfo;
use crate::ChainEpoch;

/// Smallest piece the cold tier accepts.
const MIN_PIECE_SIZE: u64 = 256;

/// A miner candidate with its asking price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerProposal {
    pub miner_addr: String,
    pub epoch_price: u64,
    /// Epoch after which the ask is no longer honoured.
    pub ask_expiry: ChainEpoch,
}

/// On-chain progress of a single deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealState {
    Proposing,
    Validating,
    Published,
    Active,
    Failed,
}

impl DealState {
    /// Whether the deal will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Active | Self::Failed)
    }
}

impl std::fmt::Display for DealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposing => "PROPOSING",
            Self::Validating => "VALIDATING",
            Self::Published => "PUBLISHED",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A submitted deal proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealHandle {
    pub proposal_cid: String,
    pub miner: String,
    pub cid: Cid,
    pub wallet: String,
    pub epoch_price: u64,
    pub duration: ChainEpoch,
    pub start_epoch: ChainEpoch,
    pub size: u64,
    /// Set on successor deals proposed by a renewal.
    #[serde(default)]
    pub renewal: bool,
}

/// One state change of a watched deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealUpdate {
    pub proposal_cid: String,
    pub miner: String,
    pub state: DealState,
    /// Failure reason for `FAILED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The resulting storage record, present on `ACTIVE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<FilStorage>,
}

/// History record of a storage deal made by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDealRecord {
    pub root_cid: Cid,
    pub addr: String,
    pub time: DateTime<Utc>,
    /// True until the deal reaches a terminal state.
    pub pending: bool,
    pub deal_info: DealInfo,
}

/// History record of a retrieval from the cold tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalDealRecord {
    pub addr: String,
    pub root_cid: Cid,
    pub miner: String,
    pub size: u64,
    pub price: u64,
    pub time: DateTime<Utc>,
}

/// Padded piece size for `bytes` of payload.
///
/// Payload is expanded by the 127/128 fr32 padding ratio and rounded up to
/// the next power of two.
pub fn piece_size(bytes: u64) -> u64 {
    let padded = bytes.saturating_add(bytes / 127).saturating_add(1);
    padded.checked_next_power_of_two().unwrap_or(u64::MAX).max(MIN_PIECE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deal_state_terminal() {
        assert!(!DealState::Proposing.is_terminal());
        assert!(!DealState::Published.is_terminal());
        assert!(DealState::Active.is_terminal());
        assert!(DealState::Failed.is_terminal());
    }

    #[test]
    fn deal_state_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&DealState::Validating).unwrap(),
            "\"VALIDATING\""
        );
        assert_eq!(DealState::Active.to_string(), "ACTIVE");
    }

    #[test]
    fn piece_size_is_power_of_two_with_floor() {
        assert_eq!(piece_size(0), 256);
        assert_eq!(piece_size(5), 256);
        assert_eq!(piece_size(253), 256);
        assert_eq!(piece_size(254), 512);
        assert_eq!(piece_size(1 << 20), 2 << 20);
        for b in [1u64, 1000, 65_000, 10 << 20] {
            assert!(piece_size(b).is_power_of_two());
            assert!(piece_size(b) > b);
        }
    }
}
