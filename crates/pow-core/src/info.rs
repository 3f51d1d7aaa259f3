//! # Cid Info
//!
//! The latest observed storage state of a `(profile, cid)`. Written only
//! when a job for that key finishes successfully.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{Cid, JobId, ProfileId};
use crate::ChainEpoch;

/// Observed storage state of one cid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidInfo {
    pub profile_id: ProfileId,
    pub cid: Cid,
    /// The job that produced this snapshot.
    pub job_id: JobId,
    pub created: DateTime<Utc>,
    pub hot: HotInfo,
    pub cold: ColdInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotInfo {
    pub enabled: bool,
    pub size: u64,
    pub ipfs: IpfsHotInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpfsHotInfo {
    /// When the data was first pinned.
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdInfo {
    pub enabled: bool,
    pub filecoin: FilInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilInfo {
    /// Payload cid stored in deals.
    pub data_cid: Option<Cid>,
    pub size: u64,
    pub proposals: Vec<FilStorage>,
}

/// An active cold-tier deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilStorage {
    pub proposal_cid: String,
    pub piece_cid: String,
    pub deal_id: Option<u64>,
    pub miner: String,
    pub activation_epoch: ChainEpoch,
    pub start_epoch: ChainEpoch,
    pub duration: ChainEpoch,
    pub epoch_price: u64,
    /// Set on a successor deal created by renewal.
    #[serde(default)]
    pub renewed: bool,
}

impl FilStorage {
    /// Epoch at which the deal expires.
    pub fn end_epoch(&self) -> ChainEpoch {
        self.start_epoch + self.duration
    }

    /// Epochs left before expiry at `height`; negative once expired.
    pub fn remaining(&self, height: ChainEpoch) -> ChainEpoch {
        self.end_epoch() - height
    }

    /// Whether the deal is active at `height`.
    pub fn is_active_at(&self, height: ChainEpoch) -> bool {
        self.remaining(height) > 0
    }
}

impl CidInfo {
    /// Distinct miners holding a deal in this snapshot.
    pub fn miners(&self) -> Vec<String> {
        let mut miners: Vec<String> = self
            .cold
            .filecoin
            .proposals
            .iter()
            .map(|p| p.miner.clone())
            .collect();
        miners.sort();
        miners.dedup();
        miners
    }
}
