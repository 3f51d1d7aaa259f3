//! # Capability Traits
//!
//! The engine drives storage through four back-end interfaces:
//!
//! - [`HotStorage`]: a content-addressed store with pinning (IPFS-like).
//! - [`ColdStorage`]: deal-backed storage with miners (Filecoin-like).
//! - [`MinerSelector`]: ranks miners for new deals.
//! - [`WalletManager`]: addresses, balances, and signatures.
//!
//! All are object-safe through `async_trait` and must be safe for
//! concurrent use. Implementations are substitutable at startup; the
//! `pow-devnet` crate provides in-process ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pow_core::{
    ChainEpoch, Cid, Codec, DealError, DealHandle, DealUpdate, FilConfig, FilStorage,
    MinerProposal,
};
use tokio::sync::mpsc;

use crate::error::CapabilityError;

// ─── Hot tier ────────────────────────────────────────────────────────

#[async_trait]
pub trait HotStorage: Send + Sync + 'static {
    /// Add bytes, returning their cid. Staged data is retained for a while
    /// even when nothing pins it.
    async fn stage(&self, data: Bytes, codec: Codec) -> Result<Cid, CapabilityError>;

    /// Mark an already present cid as staged.
    async fn stage_cid(&self, cid: &Cid) -> Result<(), CapabilityError>;

    /// Add a block under a known cid, as after a cold-tier retrieval.
    async fn put_block(&self, cid: &Cid, data: Bytes) -> Result<(), CapabilityError>;

    /// Pin a cid, waiting at most `timeout` for its content. Returns the
    /// pinned size. Pinning a pinned cid is a no-op.
    async fn pin(&self, cid: &Cid, timeout: Duration) -> Result<u64, CapabilityError>;

    async fn unpin(&self, cid: &Cid) -> Result<(), CapabilityError>;

    async fn is_pinned(&self, cid: &Cid) -> Result<bool, CapabilityError>;

    async fn get(&self, cid: &Cid) -> Result<Bytes, CapabilityError>;

    async fn size(&self, cid: &Cid) -> Result<u64, CapabilityError>;
}

// ─── Cold tier ───────────────────────────────────────────────────────

/// Terms of new deals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealParams {
    /// Paying wallet.
    pub wallet: String,
    pub duration: ChainEpoch,
    /// Epochs from now until the deal starts.
    pub start_offset: ChainEpoch,
    pub fast_retrieval: bool,
}

impl DealParams {
    pub fn from_config(fil: &FilConfig) -> Self {
        Self {
            wallet: fil.addr.clone(),
            duration: fil.deal_min_duration,
            start_offset: fil.deal_start_offset,
            fast_retrieval: fil.fast_retrieval,
        }
    }
}

/// Result of submitting proposals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Proposals accepted for negotiation.
    pub started: Vec<DealHandle>,
    /// Proposals refused up front.
    pub rejected: Vec<DealError>,
}

/// Retrieval constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Miners to retrieve from, in preference order. Empty means any.
    pub miners: Vec<String>,
    /// Maximum total price. Zero means no limit.
    pub max_price: u64,
}

/// Data retrieved from the cold tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub data: Bytes,
    pub miner: String,
    pub price: u64,
}

#[async_trait]
pub trait ColdStorage: Send + Sync + 'static {
    /// Submit one deal proposal per entry of `proposals`.
    async fn store(
        &self,
        cid: &Cid,
        proposals: &[MinerProposal],
        params: &DealParams,
    ) -> Result<StoreOutcome, CapabilityError>;

    /// Stream every state change of `handles`. The channel closes once all
    /// of them are terminal.
    async fn watch(
        &self,
        handles: &[DealHandle],
    ) -> Result<mpsc::Receiver<DealUpdate>, CapabilityError>;

    /// Retrieve `cid` through a paid retrieval deal.
    async fn fetch(
        &self,
        cid: &Cid,
        wallet: &str,
        opts: &FetchOptions,
    ) -> Result<FetchOutcome, CapabilityError>;

    /// Deals for `cid` paid by any of `wallets` that are active now.
    async fn list_active_deals(
        &self,
        cid: &Cid,
        wallets: &[String],
    ) -> Result<Vec<FilStorage>, CapabilityError>;

    /// Propose a successor to `deal` starting before it expires.
    async fn renew(
        &self,
        cid: &Cid,
        deal: &FilStorage,
        params: &DealParams,
    ) -> Result<DealHandle, CapabilityError>;

    /// Current chain height.
    async fn height(&self) -> Result<ChainEpoch, CapabilityError>;
}

// ─── Miner selection ─────────────────────────────────────────────────

/// Constraints for choosing miners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectConstraints {
    pub excluded: Vec<String>,
    /// When non-empty, only these miners, in this order.
    pub trusted: Vec<String>,
    /// Zero means no limit.
    pub max_price: u64,
    /// Allowed countries; empty allows all.
    pub country_codes: Vec<String>,
    /// Padded size of the piece to store.
    pub piece_size: u64,
}

impl SelectConstraints {
    pub fn from_config(fil: &FilConfig, piece_size: u64) -> Self {
        Self {
            excluded: fil.excluded_miners.clone(),
            trusted: fil.trusted_miners.clone(),
            max_price: fil.max_price,
            country_codes: fil.country_codes.clone(),
            piece_size,
        }
    }

    /// Add miners to the exclusion list.
    pub fn exclude(&mut self, miners: impl IntoIterator<Item = String>) {
        for m in miners {
            if !self.excluded.contains(&m) {
                self.excluded.push(m);
            }
        }
    }
}

#[async_trait]
pub trait MinerSelector: Send + Sync + 'static {
    /// Up to `n` proposals ordered best first.
    async fn select(
        &self,
        constraints: &SelectConstraints,
        n: usize,
    ) -> Result<Vec<MinerProposal>, CapabilityError>;
}

// ─── Wallet ──────────────────────────────────────────────────────────

#[async_trait]
pub trait WalletManager: Send + Sync + 'static {
    /// Create an address of the given key type.
    async fn new_address(&self, addr_type: &str) -> Result<String, CapabilityError>;

    /// Every address the wallet holds.
    async fn list(&self) -> Result<Vec<String>, CapabilityError>;

    async fn balance(&self, addr: &str) -> Result<u64, CapabilityError>;

    async fn send(&self, from: &str, to: &str, amount: u64) -> Result<(), CapabilityError>;

    async fn sign(&self, addr: &str, message: &[u8]) -> Result<Vec<u8>, CapabilityError>;

    async fn verify(
        &self,
        addr: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CapabilityError>;
}

/// The back-ends one engine instance runs against.
#[derive(Clone)]
pub struct Capabilities {
    pub hot: Arc<dyn HotStorage>,
    pub cold: Arc<dyn ColdStorage>,
    pub selector: Arc<dyn MinerSelector>,
    pub wallet: Arc<dyn WalletManager>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
