//! Minimal in-memory back-ends for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pow_core::{
    AddrInfo, ChainEpoch, Cid, Codec, DealHandle, DealState, DealUpdate, FilStorage,
    MinerProposal, ProfileId, StorageConfig,
};
use pow_store::{Datastore, MemDatastore, Stores};
use tokio::sync::mpsc;

use crate::capability::{
    Capabilities, ColdStorage, DealParams, FetchOptions, FetchOutcome, HotStorage, StoreOutcome,
    WalletManager,
};
use crate::config::EngineConfig;
use crate::error::CapabilityError;
use crate::executor::Executor;
use crate::selector::{FixedMinerSelector, MinerAsk};

// ── Hot ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeHot {
    blocks: Mutex<HashMap<Cid, Bytes>>,
    pins: Mutex<HashSet<Cid>>,
    stall_stage: AtomicBool,
}

impl FakeHot {
    pub fn pinned(&self, cid: &Cid) -> bool {
        self.pins.lock().contains(cid)
    }

    /// Make every later `stage` call hang.
    pub fn stall_staging(&self) {
        self.stall_stage.store(true, Ordering::SeqCst);
    }

    /// Lose the block and its pin.
    pub fn forget(&self, cid: &Cid) {
        self.blocks.lock().remove(cid);
        self.pins.lock().remove(cid);
    }
}

#[async_trait]
impl HotStorage for FakeHot {
    async fn stage(&self, data: Bytes, codec: Codec) -> Result<Cid, CapabilityError> {
        if self.stall_stage.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let cid = Cid::for_content(codec, &data);
        self.blocks.lock().insert(cid.clone(), data);
        Ok(cid)
    }

    async fn stage_cid(&self, cid: &Cid) -> Result<(), CapabilityError> {
        if self.blocks.lock().contains_key(cid) {
            Ok(())
        } else {
            Err(CapabilityError::NotFound(cid.to_string()))
        }
    }

    async fn put_block(&self, cid: &Cid, data: Bytes) -> Result<(), CapabilityError> {
        self.blocks.lock().insert(cid.clone(), data);
        Ok(())
    }

    async fn pin(&self, cid: &Cid, timeout: Duration) -> Result<u64, CapabilityError> {
        let size = self.blocks.lock().get(cid).map(|b| b.len() as u64);
        match size {
            Some(size) => {
                self.pins.lock().insert(cid.clone());
                Ok(size)
            }
            None => Err(CapabilityError::Timeout(timeout)),
        }
    }

    async fn unpin(&self, cid: &Cid) -> Result<(), CapabilityError> {
        self.pins.lock().remove(cid);
        Ok(())
    }

    async fn is_pinned(&self, cid: &Cid) -> Result<bool, CapabilityError> {
        Ok(self.pinned(cid))
    }

    async fn get(&self, cid: &Cid) -> Result<Bytes, CapabilityError> {
        self.blocks
            .lock()
            .get(cid)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(cid.to_string()))
    }

    async fn size(&self, cid: &Cid) -> Result<u64, CapabilityError> {
        self.get(cid).await.map(|b| b.len() as u64)
    }
}

// ── Cold ────────────────────────────────────────────────────────────

/// How a miner answers proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Activate,
    Fail,
    /// Never reaches a final state.
    Hang,
}

struct Deal {
    handle: DealHandle,
    state: DealState,
    storage: FilStorage,
}

#[derive(Default)]
struct ColdState {
    height: ChainEpoch,
    deals: Vec<Deal>,
    data: HashMap<Cid, Bytes>,
    retrieval_price: u64,
    /// Senders of watches over hanging deals, kept so the stream stays open.
    held: Vec<mpsc::Sender<DealUpdate>>,
}

pub struct FakeCold {
    miners: Mutex<HashMap<String, Outcome>>,
    state: Mutex<ColdState>,
}

impl FakeCold {
    fn new(miners: &[(&str, Outcome)]) -> Self {
        Self {
            miners: Mutex::new(miners.iter().map(|(m, o)| (m.to_string(), *o)).collect()),
            state: Mutex::new(ColdState {
                height: 1_000,
                ..ColdState::default()
            }),
        }
    }

    /// Every proposal cid made so far.
    pub fn proposed(&self) -> Vec<String> {
        self.state
            .lock()
            .deals
            .iter()
            .map(|d| d.handle.proposal_cid.clone())
            .collect()
    }

    pub fn active(&self) -> Vec<FilStorage> {
        self.state
            .lock()
            .deals
            .iter()
            .filter(|d| d.state == DealState::Active)
            .map(|d| d.storage.clone())
            .collect()
    }

    /// Change how `miner` answers deals watched from now on.
    pub fn set_outcome(&self, miner: &str, outcome: Outcome) {
        self.miners.lock().insert(miner.to_string(), outcome);
    }

    pub fn set_height(&self, height: ChainEpoch) {
        self.state.lock().height = height;
    }

    pub fn set_retrieval_price(&self, price: u64) {
        self.state.lock().retrieval_price = price;
    }

    fn propose(
        &self,
        s: &mut ColdState,
        cid: &Cid,
        miner: &str,
        price: u64,
        params: &DealParams,
        renewal: bool,
    ) -> DealHandle {
        let n = s.deals.len() + 1;
        let start = s.height + params.start_offset + 1;
        let handle = DealHandle {
            proposal_cid: format!("proposal-{n}"),
            miner: miner.to_string(),
            cid: cid.clone(),
            wallet: params.wallet.clone(),
            epoch_price: price,
            duration: params.duration,
            start_epoch: start,
            size: 256,
            renewal,
        };
        let storage = FilStorage {
            proposal_cid: handle.proposal_cid.clone(),
            piece_cid: format!("piece-{n}"),
            deal_id: Some(n as u64),
            miner: miner.to_string(),
            activation_epoch: start,
            start_epoch: start,
            duration: params.duration,
            epoch_price: price,
            renewed: renewal,
        };
        s.deals.push(Deal {
            handle: handle.clone(),
            state: DealState::Proposing,
            storage,
        });
        handle
    }
}

#[async_trait]
impl ColdStorage for FakeCold {
    async fn store(
        &self,
        cid: &Cid,
        proposals: &[MinerProposal],
        params: &DealParams,
    ) -> Result<StoreOutcome, CapabilityError> {
        let mut s = self.state.lock();
        let mut out = StoreOutcome::default();
        for p in proposals {
            out.started
                .push(self.propose(&mut s, cid, &p.miner_addr, p.epoch_price, params, false));
        }
        Ok(out)
    }

    async fn watch(
        &self,
        handles: &[DealHandle],
    ) -> Result<mpsc::Receiver<DealUpdate>, CapabilityError> {
        let (tx, rx) = mpsc::channel(handles.len() + 1);
        let miners = self.miners.lock().clone();
        let mut s = self.state.lock();
        let mut hanging = false;
        for h in handles {
            let outcome = miners.get(&h.miner).copied().unwrap_or(Outcome::Fail);
            let Some(deal) = s
                .deals
                .iter_mut()
                .find(|d| d.handle.proposal_cid == h.proposal_cid)
            else {
                continue;
            };
            let state = match (deal.state, outcome) {
                (DealState::Proposing, Outcome::Activate) => DealState::Active,
                (DealState::Proposing, Outcome::Fail) => DealState::Failed,
                (state, _) => state,
            };
            deal.state = state;
            if state.is_terminal() {
                let _ = tx.try_send(DealUpdate {
                    proposal_cid: h.proposal_cid.clone(),
                    miner: h.miner.clone(),
                    state,
                    message: (state == DealState::Failed).then(|| "miner refused".to_string()),
                    storage: Some(deal.storage.clone()),
                });
            } else {
                hanging = true;
            }
        }
        if hanging {
            s.held.push(tx);
        }
        Ok(rx)
    }

    async fn fetch(
        &self,
        cid: &Cid,
        _wallet: &str,
        opts: &FetchOptions,
    ) -> Result<FetchOutcome, CapabilityError> {
        let s = self.state.lock();
        if opts.max_price > 0 && s.retrieval_price > opts.max_price {
            return Err(CapabilityError::PriceExceeded {
                price: s.retrieval_price,
                max: opts.max_price,
            });
        }
        let data = s
            .data
            .get(cid)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(cid.to_string()))?;
        Ok(FetchOutcome {
            data,
            miner: opts.miners.first().cloned().unwrap_or_default(),
            price: s.retrieval_price,
        })
    }

    async fn list_active_deals(
        &self,
        cid: &Cid,
        wallets: &[String],
    ) -> Result<Vec<FilStorage>, CapabilityError> {
        let s = self.state.lock();
        Ok(s.deals
            .iter()
            .filter(|d| {
                d.state == DealState::Active
                    && &d.handle.cid == cid
                    && wallets.contains(&d.handle.wallet)
                    && d.storage.is_active_at(s.height)
            })
            .map(|d| d.storage.clone())
            .collect())
    }

    async fn renew(
        &self,
        cid: &Cid,
        deal: &FilStorage,
        params: &DealParams,
    ) -> Result<DealHandle, CapabilityError> {
        let mut s = self.state.lock();
        Ok(self.propose(&mut s, cid, &deal.miner, deal.epoch_price, params, true))
    }

    async fn height(&self) -> Result<ChainEpoch, CapabilityError> {
        Ok(self.state.lock().height)
    }
}

// ── Wallet ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeWallet {
    addrs: Mutex<Vec<String>>,
}

#[async_trait]
impl WalletManager for FakeWallet {
    async fn new_address(&self, _addr_type: &str) -> Result<String, CapabilityError> {
        let mut addrs = self.addrs.lock();
        let addr = format!("f1fake{}", addrs.len());
        addrs.push(addr.clone());
        Ok(addr)
    }

    async fn list(&self) -> Result<Vec<String>, CapabilityError> {
        Ok(self.addrs.lock().clone())
    }

    async fn balance(&self, _addr: &str) -> Result<u64, CapabilityError> {
        Ok(0)
    }

    async fn send(&self, _from: &str, _to: &str, _amount: u64) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn sign(&self, _addr: &str, message: &[u8]) -> Result<Vec<u8>, CapabilityError> {
        Ok(message.iter().rev().copied().collect())
    }

    async fn verify(
        &self,
        _addr: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CapabilityError> {
        Ok(message.iter().rev().eq(signature.iter()))
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub ds: Arc<dyn Datastore>,
    pub stores: Stores,
    pub caps: Capabilities,
    pub executor: Executor,
    pub hot: Arc<FakeHot>,
    pub cold: Arc<FakeCold>,
    pub profile: ProfileId,
    pub addr: String,
    pub engine: EngineConfig,
}

impl Harness {
    /// Stage bytes in the hot tier and hand them to every miner.
    pub async fn stage(&self, data: &[u8]) -> Cid {
        let data = Bytes::copy_from_slice(data);
        let cid = self
            .hot
            .stage(data.clone(), Codec::Raw)
            .await
            .expect("stage");
        self.cold.state.lock().data.insert(cid.clone(), data);
        cid
    }

    /// A default config paying from the profile's address.
    pub fn config(&self) -> StorageConfig {
        StorageConfig::default().with_addr(self.addr.clone())
    }
}

pub fn harness(miners: &[(&str, Outcome)]) -> Harness {
    let ds: Arc<dyn Datastore> = Arc::new(MemDatastore::new());
    let stores = Stores::open(Arc::clone(&ds)).expect("stores");
    let hot = Arc::new(FakeHot::default());
    let cold = Arc::new(FakeCold::new(miners));
    let asks = miners
        .iter()
        .map(|(m, _)| MinerAsk {
            miner: m.to_string(),
            price: 10,
            min_piece_size: 0,
            max_piece_size: u64::MAX,
            country: "US".into(),
            score: 1.0,
            expiry: 1_000_000,
        })
        .collect();
    let caps = Capabilities {
        hot: hot.clone(),
        cold: cold.clone(),
        selector: Arc::new(FixedMinerSelector::new(asks)),
        wallet: Arc::new(FakeWallet::default()),
    };
    let addr = "f1harness".to_string();
    let (profile, _) = stores
        .profiles
        .create(
            AddrInfo {
                name: "default".into(),
                addr: addr.clone(),
                addr_type: "bls".into(),
            },
            StorageConfig::default(),
        )
        .expect("profile");
    let engine = EngineConfig::default()
        .with_infra_retries(1, Duration::from_millis(1))
        .with_poll_interval(Duration::from_millis(20));
    Harness {
        ds,
        executor: Executor::new(stores.clone(), caps.clone(), engine.clone()),
        stores,
        caps,
        hot,
        cold,
        profile: profile.id,
        addr,
        engine,
    }
}
