//! # Simulated Cold Tier
//!
//! A chain with a height, a set of miners, and a deal state machine. Each
//! [`tick`](SimulatedCold::tick) advances the height by one epoch and moves
//! every open deal according to its miner's [`MinerBehavior`]:
//!
//! ```text
//! PROPOSING ─▶ VALIDATING ─▶ PUBLISHED ─▶ ACTIVE      (activate)
//!                    └──────▶ FAILED                   (fail)
//!                              PUBLISHED forever       (stall)
//! ```
//!
//! A rejecting miner refuses proposals up front. Deal payloads are copied
//! out of the hot tier when proposed, so retrievals work after the hot copy
//! is gone.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use pow_core::{
    piece_size, ChainEpoch, Cid, DealError, DealHandle, DealState, DealUpdate, FilStorage,
    MinerProposal,
};
use pow_engine::{
    CapabilityError, ColdStorage, DealParams, FetchOptions, FetchOutcome, MinerAsk, StoreOutcome,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::DevnetError;
use crate::hot::MemoryHot;

/// Epochs from proposal to activation for well-behaved miners.
pub const DEFAULT_ACTIVATION_EPOCHS: ChainEpoch = 3;

/// Chain height of a fresh devnet.
pub const DEFAULT_START_HEIGHT: ChainEpoch = 1_000;

/// Ask validity, in epochs from the current height.
const ASK_LIFETIME: ChainEpoch = 100_000;

// ─── Miners ──────────────────────────────────────────────────────────

/// How a simulated miner treats deals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerBehavior {
    /// Seals and activates deals.
    Activate,
    /// Refuses proposals.
    Reject,
    /// Accepts, then fails deals during publishing.
    Fail,
    /// Accepts and never finishes.
    Stall,
}

impl FromStr for MinerBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "activate" | "ok" => Ok(Self::Activate),
            "reject" => Ok(Self::Reject),
            "fail" => Ok(Self::Fail),
            "stall" => Ok(Self::Stall),
            other => Err(format!("unknown behavior {other:?}")),
        }
    }
}

/// A simulated miner.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerSpec {
    pub addr: String,
    pub behavior: MinerBehavior,
    /// Storage price per epoch.
    pub price: u64,
    /// Total price of one retrieval.
    pub retrieval_price: u64,
    pub country: String,
    pub score: f64,
    pub min_piece_size: u64,
    pub max_piece_size: u64,
}

impl MinerSpec {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            behavior: MinerBehavior::Activate,
            price: 10,
            retrieval_price: 0,
            country: "US".into(),
            score: 1.0,
            min_piece_size: 0,
            max_piece_size: u64::MAX,
        }
    }

    pub fn with_behavior(mut self, behavior: MinerBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_price(mut self, price: u64) -> Self {
        self.price = price;
        self
    }

    pub fn with_retrieval_price(mut self, price: u64) -> Self {
        self.retrieval_price = price;
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    fn ask(&self, height: ChainEpoch) -> MinerAsk {
        MinerAsk {
            miner: self.addr.clone(),
            price: self.price,
            min_piece_size: self.min_piece_size,
            max_piece_size: self.max_piece_size,
            country: self.country.clone(),
            score: self.score,
            expiry: height + ASK_LIFETIME,
        }
    }
}

/// `addr[:behavior[:price[:country]]]`, e.g. `f01000:stall:5:DE`.
impl FromStr for MinerSpec {
    type Err = DevnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| DevnetError::InvalidMiner {
            spec: s.to_string(),
            reason,
        };
        let mut parts = s.trim().split(':');
        let addr = parts.next().unwrap_or_default();
        if addr.is_empty() {
            return Err(invalid("empty miner address".into()));
        }
        let mut spec = MinerSpec::new(addr);
        if let Some(b) = parts.next() {
            spec.behavior = b.parse().map_err(invalid)?;
        }
        if let Some(p) = parts.next() {
            spec.price = p
                .parse()
                .map_err(|_| invalid(format!("price {p:?} is not a number")))?;
        }
        if let Some(c) = parts.next() {
            spec.country = c.to_ascii_uppercase();
        }
        if parts.next().is_some() {
            return Err(invalid("too many fields".into()));
        }
        Ok(spec)
    }
}

// ─── Chain state ─────────────────────────────────────────────────────

#[derive(Debug)]
struct SimDeal {
    handle: DealHandle,
    state: DealState,
    proposed_at: ChainEpoch,
    storage: Option<FilStorage>,
    message: Option<String>,
}

impl SimDeal {
    fn update(&self) -> DealUpdate {
        DealUpdate {
            proposal_cid: self.handle.proposal_cid.clone(),
            miner: self.handle.miner.clone(),
            state: self.state,
            message: self.message.clone(),
            storage: self.storage.clone(),
        }
    }

    fn is_active_at(&self, height: ChainEpoch) -> bool {
        self.state == DealState::Active
            && self.storage.as_ref().is_some_and(|s| s.is_active_at(height))
    }
}

#[derive(Debug)]
struct Watcher {
    pending: HashSet<String>,
    tx: mpsc::Sender<DealUpdate>,
}

#[derive(Debug, Default)]
struct Chain {
    height: ChainEpoch,
    deals: Vec<SimDeal>,
    by_proposal: HashMap<String, usize>,
    /// Payloads held by miners.
    sealed: HashMap<Cid, Bytes>,
    watchers: Vec<Watcher>,
    next_deal_id: u64,
}

impl Chain {
    fn open(
        &mut self,
        cid: &Cid,
        miner: &str,
        epoch_price: u64,
        params: &DealParams,
        size: u64,
        renewal: bool,
    ) -> DealHandle {
        let n = self.deals.len() + 1;
        let handle = DealHandle {
            proposal_cid: format!("bafyprop{n:06}{}", miner.trim_start_matches('f')),
            miner: miner.to_string(),
            cid: cid.clone(),
            wallet: params.wallet.clone(),
            epoch_price,
            duration: params.duration,
            start_epoch: self.height + params.start_offset + 1,
            size,
            renewal,
        };
        self.by_proposal.insert(handle.proposal_cid.clone(), self.deals.len());
        self.deals.push(SimDeal {
            handle: handle.clone(),
            state: DealState::Proposing,
            proposed_at: self.height,
            storage: None,
            message: None,
        });
        handle
    }

    fn notify(&mut self, update: &DealUpdate) {
        for w in &mut self.watchers {
            if !w.pending.contains(&update.proposal_cid) {
                continue;
            }
            // Capacity covers every transition of every watched deal.
            let _ = w.tx.try_send(update.clone());
            if update.state.is_terminal() {
                w.pending.remove(&update.proposal_cid);
            }
        }
        self.watchers
            .retain(|w| !w.pending.is_empty() && !w.tx.is_closed());
    }
}

/// State a deal should be in `age` epochs after its proposal.
fn target_state(behavior: MinerBehavior, age: ChainEpoch, activation: ChainEpoch) -> DealState {
    match behavior {
        MinerBehavior::Activate if age >= activation => DealState::Active,
        MinerBehavior::Fail | MinerBehavior::Reject if age >= 2 => DealState::Failed,
        _ if age >= 2 => DealState::Published,
        _ if age >= 1 => DealState::Validating,
        _ => DealState::Proposing,
    }
}

// ─── SimulatedCold ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct SimulatedCold {
    miners: RwLock<HashMap<String, MinerSpec>>,
    hot: Arc<MemoryHot>,
    chain: Mutex<Chain>,
    activation_epochs: ChainEpoch,
    online: AtomicBool,
}

impl SimulatedCold {
    /// A chain at `start_height` whose payloads are read from `hot`.
    pub fn new(
        miners: Vec<MinerSpec>,
        hot: Arc<MemoryHot>,
        start_height: ChainEpoch,
        activation_epochs: ChainEpoch,
    ) -> Result<Self, DevnetError> {
        let mut index = HashMap::with_capacity(miners.len());
        for m in miners {
            if index.contains_key(&m.addr) {
                return Err(DevnetError::DuplicateMiner(m.addr));
            }
            index.insert(m.addr.clone(), m);
        }
        Ok(Self {
            miners: RwLock::new(index),
            hot,
            chain: Mutex::new(Chain {
                height: start_height,
                ..Chain::default()
            }),
            activation_epochs: activation_epochs.max(1),
            online: AtomicBool::new(true),
        })
    }

    pub fn current_height(&self) -> ChainEpoch {
        self.chain.lock().height
    }

    /// Current asks of every miner that accepts deals.
    pub fn asks(&self) -> Vec<MinerAsk> {
        let height = self.current_height();
        let mut asks: Vec<MinerAsk> = self
            .miners
            .read()
            .values()
            .filter(|m| m.behavior != MinerBehavior::Reject)
            .map(|m| m.ask(height))
            .collect();
        asks.sort_by(|a, b| a.miner.cmp(&b.miner));
        asks
    }

    pub fn set_behavior(&self, miner: &str, behavior: MinerBehavior) {
        if let Some(m) = self.miners.write().get_mut(miner) {
            m.behavior = behavior;
        }
    }

    pub fn set_retrieval_price(&self, miner: &str, price: u64) {
        if let Some(m) = self.miners.write().get_mut(miner) {
            m.retrieval_price = price;
        }
    }

    /// While offline every call fails with `Infrastructure`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Terminate every active deal of `miner`, as after a fault.
    pub fn slash(&self, miner: &str) -> usize {
        let mut chain = self.chain.lock();
        let mut n = 0;
        for d in chain.deals.iter_mut() {
            if d.handle.miner == miner && d.state == DealState::Active {
                d.state = DealState::Failed;
                d.message = Some("deal slashed".into());
                n += 1;
            }
        }
        tracing::info!(miner, slashed = n, "slashed miner deals");
        n
    }

    /// Proposals made to `miner`, renewals included.
    pub fn proposals_to(&self, miner: &str) -> usize {
        self.chain
            .lock()
            .deals
            .iter()
            .filter(|d| d.handle.miner == miner)
            .count()
    }

    /// Total proposals made.
    pub fn proposal_count(&self) -> usize {
        self.chain.lock().deals.len()
    }

    /// Advance one epoch.
    pub fn tick(&self) {
        let miners = self.miners.read();
        let mut chain = self.chain.lock();
        chain.height += 1;
        let height = chain.height;
        let mut updates = Vec::new();
        for i in 0..chain.deals.len() {
            let next_id = chain.next_deal_id + 1;
            let deal = &mut chain.deals[i];
            if deal.state.is_terminal() {
                continue;
            }
            let behavior = miners
                .get(&deal.handle.miner)
                .map_or(MinerBehavior::Fail, |m| m.behavior);
            let state = target_state(behavior, height - deal.proposed_at, self.activation_epochs);
            if state == deal.state {
                continue;
            }
            deal.state = state;
            let mut new_deal = false;
            match state {
                DealState::Active => {
                    let h = &deal.handle;
                    deal.storage = Some(FilStorage {
                        proposal_cid: h.proposal_cid.clone(),
                        piece_cid: format!("baga{}", h.proposal_cid),
                        deal_id: Some(next_id),
                        miner: h.miner.clone(),
                        activation_epoch: height,
                        start_epoch: h.start_epoch.max(height),
                        duration: h.duration,
                        epoch_price: h.epoch_price,
                        renewed: h.renewal,
                    });
                    new_deal = true;
                }
                DealState::Failed => {
                    deal.message = Some("miner failed to publish the deal".into());
                }
                _ => {}
            }
            updates.push(deal.update());
            if new_deal {
                chain.next_deal_id = next_id;
            }
        }
        for u in &updates {
            chain.notify(u);
        }
        if !updates.is_empty() {
            tracing::debug!(height, changed = updates.len(), "deals progressed");
        }
    }

    /// Advance `epochs` epochs.
    pub fn advance(&self, epochs: ChainEpoch) {
        for _ in 0..epochs {
            self.tick();
        }
    }

    /// Jump the height without progressing deals, to age active deals.
    pub fn set_height(&self, height: ChainEpoch) {
        self.chain.lock().height = height;
    }

    /// Tick every `block_time` for as long as the chain lives.
    pub fn spawn_chain(self: &Arc<Self>, block_time: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(block_time);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cold) => cold.tick(),
                    None => break,
                }
            }
        })
    }

    fn check_online(&self) -> Result<(), CapabilityError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CapabilityError::Infrastructure("chain node offline".into()))
        }
    }

    fn payload(&self, chain: &Chain, cid: &Cid) -> Result<Bytes, CapabilityError> {
        chain
            .sealed
            .get(cid)
            .cloned()
            .or_else(|| self.hot.block(cid))
            .ok_or_else(|| CapabilityError::NotFound(format!("payload {cid}")))
    }
}

#[async_trait]
impl ColdStorage for SimulatedCold {
    async fn store(
        &self,
        cid: &Cid,
        proposals: &[MinerProposal],
        params: &DealParams,
    ) -> Result<StoreOutcome, CapabilityError> {
        self.check_online()?;
        let miners = self.miners.read();
        let mut chain = self.chain.lock();
        let data = self.payload(&chain, cid)?;
        let size = data.len() as u64;
        let piece = piece_size(size);
        let mut out = StoreOutcome::default();
        for p in proposals {
            let refuse = |message: &str| DealError {
                proposal_cid: None,
                miner: p.miner_addr.clone(),
                message: message.to_string(),
            };
            let Some(spec) = miners.get(&p.miner_addr) else {
                out.rejected.push(refuse("unknown miner"));
                continue;
            };
            if spec.behavior == MinerBehavior::Reject {
                out.rejected.push(refuse("miner rejected the proposal"));
                continue;
            }
            if piece < spec.min_piece_size || piece > spec.max_piece_size {
                out.rejected.push(refuse("piece size outside the miner's ask"));
                continue;
            }
            out.started
                .push(chain.open(cid, &p.miner_addr, p.epoch_price, params, size, false));
        }
        if !out.started.is_empty() {
            chain.sealed.insert(cid.clone(), data);
        }
        Ok(out)
    }

    async fn watch(
        &self,
        handles: &[DealHandle],
    ) -> Result<mpsc::Receiver<DealUpdate>, CapabilityError> {
        self.check_online()?;
        let (tx, rx) = mpsc::channel(handles.len() * 5 + 1);
        let mut chain = self.chain.lock();
        let mut pending = HashSet::new();
        for h in handles {
            let update = match chain.by_proposal.get(&h.proposal_cid) {
                Some(&i) => chain.deals[i].update(),
                None => DealUpdate {
                    proposal_cid: h.proposal_cid.clone(),
                    miner: h.miner.clone(),
                    state: DealState::Failed,
                    message: Some("unknown proposal".into()),
                    storage: None,
                },
            };
            if !update.state.is_terminal() {
                pending.insert(update.proposal_cid.clone());
            }
            let _ = tx.try_send(update);
        }
        if !pending.is_empty() {
            chain.watchers.push(Watcher { pending, tx });
        }
        Ok(rx)
    }

    async fn fetch(
        &self,
        cid: &Cid,
        wallet: &str,
        opts: &FetchOptions,
    ) -> Result<FetchOutcome, CapabilityError> {
        self.check_online()?;
        let miners = self.miners.read();
        let chain = self.chain.lock();
        let holders: Vec<&str> = chain
            .deals
            .iter()
            .filter(|d| &d.handle.cid == cid && d.is_active_at(chain.height))
            .map(|d| d.handle.miner.as_str())
            .collect();
        let miner = if opts.miners.is_empty() {
            holders.first().copied()
        } else {
            opts.miners
                .iter()
                .map(String::as_str)
                .find(|m| holders.contains(m))
        }
        .ok_or_else(|| CapabilityError::NotFound(format!("no active deal holds {cid}")))?;
        let price = miners.get(miner).map_or(0, |m| m.retrieval_price);
        if opts.max_price > 0 && price > opts.max_price {
            return Err(CapabilityError::PriceExceeded {
                price,
                max: opts.max_price,
            });
        }
        let data = self.payload(&chain, cid)?;
        tracing::debug!(cid = %cid, miner, wallet, price, "retrieved from cold tier");
        Ok(FetchOutcome {
            data,
            miner: miner.to_string(),
            price,
        })
    }

    async fn list_active_deals(
        &self,
        cid: &Cid,
        wallets: &[String],
    ) -> Result<Vec<FilStorage>, CapabilityError> {
        self.check_online()?;
        let chain = self.chain.lock();
        Ok(chain
            .deals
            .iter()
            .filter(|d| {
                &d.handle.cid == cid
                    && wallets.contains(&d.handle.wallet)
                    && d.is_active_at(chain.height)
            })
            .filter_map(|d| d.storage.clone())
            .collect())
    }

    async fn renew(
        &self,
        cid: &Cid,
        deal: &FilStorage,
        params: &DealParams,
    ) -> Result<DealHandle, CapabilityError> {
        self.check_online()?;
        let accepts = self
            .miners
            .read()
            .get(&deal.miner)
            .is_some_and(|m| m.behavior != MinerBehavior::Reject);
        if !accepts {
            return Err(CapabilityError::Rejected(format!(
                "miner {} does not accept renewals",
                deal.miner
            )));
        }
        let mut chain = self.chain.lock();
        let size = self.payload(&chain, cid)?.len() as u64;
        Ok(chain.open(cid, &deal.miner, deal.epoch_price, params, size, true))
    }

    async fn height(&self) -> Result<ChainEpoch, CapabilityError> {
        self.check_online()?;
        Ok(self.current_height())
    }
}
