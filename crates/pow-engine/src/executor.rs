//! # Executor
//!
//! Runs one storage job to a terminal status by driving the hot and cold
//! tiers toward the latest persisted config for the job's `(profile, cid)`.
//!
//! ## Phases
//!
//! ```text
//! plan ──▶ hot ──▶ cold (resume ─▶ renew ─▶ replicate) ──▶ finalize
//! ```
//!
//! - **Plan** reloads the config. The config embedded in the job is a
//!   historical snapshot, used only when the config was removed after the
//!   job was enqueued. Such a job still tears storage down but leaves no
//!   [`CidInfo`] behind.
//! - **Hot** pins or unpins. A failed pin may be rescued by unfreezing the
//!   data from active cold deals.
//! - **Cold** first resumes deals a previous run proposed but never saw
//!   finish, then (for reconciler jobs) renews expiring deals, then proposes
//!   new deals until `rep_factor` distinct miners hold active deals.
//!   Replication is counted from `list_active_deals` every round, so a
//!   replayed job never re-proposes to a miner that already stores the cid.
//! - **Finalize** writes the new [`CidInfo`] while a config is still
//!   persisted. Nothing else writes it.
//!
//! ## Cancellation
//!
//! Every capability call and every deal-update receive races the job's
//! cancel bit. On cancel the job keeps the progress it has, and deals still
//! in flight stay recorded as started so the next job picks them up.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use pow_core::{
    piece_size, CidInfo, ColdInfo, DealError, DealHandle, DealInfo, DealState, DealUpdate,
    ErrorKind, FilConfig, FilInfo, FilStorage, HotInfo, IpfsHotInfo, JobStatus, PowError,
    RetrievalDealRecord, StorageConfig, StorageDealRecord, StorageJob,
};
use pow_store::{StoreError, Stores};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::capability::{Capabilities, DealParams, FetchOptions, SelectConstraints};
use crate::config::EngineConfig;
use crate::error::CapabilityError;
use crate::retry::retry_infra;

/// Terminal result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub cause: Option<String>,
    pub deal_info: Vec<DealInfo>,
    pub deal_errors: Vec<DealError>,
}

/// Why a run stopped early.
#[derive(Debug)]
enum Abort {
    Canceled(Option<String>),
    Fail(PowError),
}

impl From<PowError> for Abort {
    fn from(err: PowError) -> Self {
        Self::Fail(err)
    }
}

impl From<StoreError> for Abort {
    fn from(err: StoreError) -> Self {
        Self::Fail(err.into())
    }
}

/// Drives jobs against one set of stores and capabilities.
#[derive(Debug)]
pub struct Executor {
    stores: Stores,
    caps: Capabilities,
    config: EngineConfig,
}

impl Executor {
    pub fn new(stores: Stores, caps: Capabilities, config: EngineConfig) -> Self {
        Self {
            stores,
            caps,
            config,
        }
    }

    /// Run `job` until it is terminal or `cancel` flips to `true`.
    ///
    /// The job must already be `EXECUTING`; progress is written to the job
    /// store as deals resolve. The caller persists the returned outcome.
    pub async fn execute(&self, job: &StorageJob, cancel: watch::Receiver<bool>) -> JobOutcome {
        // A replayed job starts over from planning, so progress from an
        // interrupted run is not carried over.
        let mut run = Run {
            exec: self,
            job,
            cancel,
            deal_info: Vec::new(),
            deal_errors: Vec::new(),
        };

        let (status, cause) = match run.reconcile().await {
            Ok(()) => (JobStatus::Success, None),
            Err(Abort::Canceled(cause)) => (JobStatus::Canceled, cause),
            Err(Abort::Fail(err)) => (JobStatus::Failed, Some(err.to_string())),
        };
        match &cause {
            Some(cause) => run.note(format!("job {status}: {cause}")),
            None => run.note(format!("job {status}")),
        }
        tracing::info!(
            job_id = %job.id,
            cid = %job.cid,
            profile_id = %job.profile_id,
            status = %status,
            deals = run.deal_info.len(),
            deal_errors = run.deal_errors.len(),
            "job execution finished"
        );
        JobOutcome {
            status,
            cause,
            deal_info: run.deal_info,
            deal_errors: run.deal_errors,
        }
    }
}

/// Resolve once the cancel bit is set. Never resolves if the sender is gone.
async fn canceled(mut rx: watch::Receiver<bool>) {
    let closed = rx.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

pub(crate) fn distinct_miners(deals: &[FilStorage]) -> BTreeSet<String> {
    deals.iter().map(|d| d.miner.clone()).collect()
}

/// Whether an active successor of `deal` already exists.
pub(crate) fn already_renewed(deal: &FilStorage, active: &[FilStorage]) -> bool {
    active
        .iter()
        .any(|o| o.miner == deal.miner && o.renewed && o.start_epoch > deal.start_epoch)
}

fn pending_info(handle: &DealHandle) -> DealInfo {
    DealInfo {
        proposal_cid: handle.proposal_cid.clone(),
        state: DealState::Proposing,
        miner: handle.miner.clone(),
        piece_cid: String::new(),
        size: handle.size,
        price_per_epoch: handle.epoch_price,
        start_epoch: handle.start_epoch,
        duration: handle.duration,
        deal_id: None,
        activation_epoch: 0,
        message: None,
    }
}

fn active_info(handle: &DealHandle, update: &DealUpdate) -> DealInfo {
    let mut info = pending_info(handle);
    info.state = DealState::Active;
    info.message = update.message.clone();
    if let Some(s) = &update.storage {
        info.piece_cid = s.piece_cid.clone();
        info.deal_id = s.deal_id;
        info.activation_epoch = s.activation_epoch;
        info.start_epoch = s.start_epoch;
        info.duration = s.duration;
        info.price_per_epoch = s.epoch_price;
    }
    info
}

// ─── Run ─────────────────────────────────────────────────────────────

struct Run<'a> {
    exec: &'a Executor,
    job: &'a StorageJob,
    cancel: watch::Receiver<bool>,
    deal_info: Vec<DealInfo>,
    deal_errors: Vec<DealError>,
}

impl Run<'_> {
    // -- Helpers ---------------------------------------------------------

    /// Append to the cid's log. A failed write is only traced.
    fn note(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::debug!(job_id = %self.job.id, cid = %self.job.cid, "{msg}");
        if let Err(e) =
            self.exec
                .stores
                .logs
                .log(self.job.profile_id, &self.job.cid, Some(self.job.id), msg)
        {
            tracing::warn!(job_id = %self.job.id, error = %e, "failed to write cid log");
        }
    }

    /// Await `fut` unless the job is canceled first.
    async fn guard<T>(&self, fut: impl Future<Output = T>) -> Result<T, Abort> {
        tokio::select! {
            biased;
            _ = canceled(self.cancel.clone()) => Err(Abort::Canceled(None)),
            out = fut => Ok(out),
        }
    }

    /// A cancelable capability call with infrastructure retries.
    async fn call<T, F, Fut>(&self, step: &str, f: F) -> Result<T, Abort>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let cfg = &self.exec.config;
        self.guard(retry_infra(step, cfg.infra_retries, cfg.infra_backoff, f))
            .await?
            .map_err(|e| Abort::Fail(e.context(step)))
    }

    fn persist_progress(&self) {
        if let Err(e) = self.exec.stores.jobs.update_progress(
            self.job.id,
            self.deal_info.clone(),
            self.deal_errors.clone(),
        ) {
            tracing::warn!(job_id = %self.job.id, error = %e, "failed to persist job progress");
        }
    }

    /// Addresses whose deals count for this cid.
    fn wallets(&self, cfg: &StorageConfig) -> Result<Vec<String>, Abort> {
        let mut addrs = self
            .exec
            .stores
            .profiles
            .get(self.job.profile_id)?
            .map(|p| p.addr_list())
            .unwrap_or_default();
        let addr = &cfg.cold.filecoin.addr;
        if !addr.is_empty() && !addrs.contains(addr) {
            addrs.push(addr.clone());
        }
        Ok(addrs)
    }

    async fn active_deals(&self, wallets: &[String]) -> Result<Vec<FilStorage>, Abort> {
        let cold = &self.exec.caps.cold;
        let cid = &self.job.cid;
        self.call("list active deals", || cold.list_active_deals(cid, wallets))
            .await
    }

    // -- Plan ------------------------------------------------------------

    async fn reconcile(&mut self) -> Result<(), Abort> {
        let already_canceled = *self.cancel.borrow();
        if already_canceled {
            return Err(Abort::Canceled(None));
        }
        let stores = &self.exec.stores;
        let (profile, cid) = (self.job.profile_id, &self.job.cid);
        let cfg = match stores.cids.get_config(profile, cid)? {
            Some(cfg) => cfg,
            None => {
                self.note("config removed; applying the config the job was created with");
                self.job.config.clone()
            }
        };
        let prev = stores.cids.get_info(profile, cid)?;
        let wallets = self.wallets(&cfg)?;
        self.note(format!(
            "reconciling storage: hot {}, cold {}",
            if cfg.hot.enabled { "enabled" } else { "disabled" },
            if cfg.cold.enabled { "enabled" } else { "disabled" },
        ));

        let hot = self.reconcile_hot(&cfg, &wallets, prev.as_ref()).await?;
        let cold = self.reconcile_cold(&cfg, &wallets, prev.as_ref()).await?;

        let info = CidInfo {
            profile_id: profile,
            cid: cid.clone(),
            job_id: self.job.id,
            created: Utc::now(),
            hot,
            cold,
        };
        if stores.cids.get_config(profile, cid)?.is_some() {
            stores.cids.put_info(&info)?;
        }
        Ok(())
    }

    // -- Hot -------------------------------------------------------------

    async fn reconcile_hot(
        &self,
        cfg: &StorageConfig,
        wallets: &[String],
        prev: Option<&CidInfo>,
    ) -> Result<HotInfo, Abort> {
        let hot = &self.exec.caps.hot;
        let cid = &self.job.cid;
        let pinned = self.call("check pin", || hot.is_pinned(cid)).await?;

        if !cfg.hot.enabled {
            if pinned {
                self.note("removing from hot storage");
                self.call("unpin", || hot.unpin(cid)).await?;
            }
            return Ok(HotInfo::default());
        }

        let size = if pinned {
            self.call("hot size", || hot.size(cid)).await?
        } else {
            self.note("pinning in hot storage");
            let timeout = Duration::from_secs(cfg.hot.ipfs.add_timeout_s);
            match self.call("pin", || hot.pin(cid, timeout)).await {
                Ok(size) => size,
                Err(Abort::Fail(err)) => self.unfreeze(cfg, wallets, err).await?,
                Err(abort) => return Err(abort),
            }
        };

        let created = prev
            .filter(|p| p.hot.enabled)
            .and_then(|p| p.hot.ipfs.created)
            .unwrap_or_else(Utc::now);
        Ok(HotInfo {
            enabled: true,
            size,
            ipfs: IpfsHotInfo {
                created: Some(created),
            },
        })
    }

    /// Retrieve the data from active cold deals and pin it. Returns the
    /// pinned size, or `pin_err` when unfreezing is not an option.
    async fn unfreeze(
        &self,
        cfg: &StorageConfig,
        wallets: &[String],
        pin_err: PowError,
    ) -> Result<u64, Abort> {
        if !(cfg.cold.enabled && cfg.hot.allow_unfreeze) {
            return Err(Abort::Fail(pin_err));
        }
        let active = self.active_deals(wallets).await?;
        if active.is_empty() {
            return Err(Abort::Fail(pin_err));
        }
        self.note(format!(
            "pin failed ({pin_err}); unfreezing from {} active deals",
            active.len()
        ));

        let (hot, cold, cid) = (&self.exec.caps.hot, &self.exec.caps.cold, &self.job.cid);
        let wallet = cfg.cold.filecoin.addr.clone();
        let opts = FetchOptions {
            miners: distinct_miners(&active).into_iter().collect(),
            max_price: cfg.hot.unfreeze_max_price,
        };
        let fetched = self
            .call("unfreeze", || cold.fetch(cid, &wallet, &opts))
            .await?;
        let record = RetrievalDealRecord {
            addr: wallet.clone(),
            root_cid: cid.clone(),
            miner: fetched.miner.clone(),
            size: fetched.data.len() as u64,
            price: fetched.price,
            time: Utc::now(),
        };
        self.exec.stores.deals.put_retrieval_record(&record)?;
        self.note(format!(
            "retrieved {} bytes from miner {} for {}",
            record.size, record.miner, record.price
        ));

        let data = fetched.data;
        self.call("store retrieved block", || hot.put_block(cid, data.clone()))
            .await?;
        let timeout = Duration::from_secs(cfg.hot.ipfs.add_timeout_s);
        self.call("pin", || hot.pin(cid, timeout)).await
    }

    // -- Cold ------------------------------------------------------------

    async fn reconcile_cold(
        &mut self,
        cfg: &StorageConfig,
        wallets: &[String],
        prev: Option<&CidInfo>,
    ) -> Result<ColdInfo, Abort> {
        let prev_fil = prev.map(|p| p.cold.filecoin.clone()).unwrap_or_default();
        if !cfg.cold.enabled {
            return Ok(ColdInfo {
                enabled: false,
                filecoin: prev_fil,
            });
        }
        let fil = &cfg.cold.filecoin;
        let deadline = Instant::now() + self.exec.config.deal_finality_timeout;
        let (profile, cid) = (self.job.profile_id, &self.job.cid);

        let mut timed_out = false;
        let started = self.exec.stores.deals.get_started(profile, cid)?;
        if !started.is_empty() {
            self.note(format!("resuming {} in-flight deals", started.len()));
            timed_out = self.track(&started, deadline).await?;
        }

        if !timed_out && self.job.reconcile && fil.renew.enabled {
            timed_out = self.renew_expiring(fil, wallets, deadline).await?;
        }

        let size = match prev_fil.size {
            0 => {
                let hot = &self.exec.caps.hot;
                self.call("data size", || hot.size(cid)).await?
            }
            s => s,
        };
        let target = fil.rep_factor as usize;
        let mut round = 0;
        let active = loop {
            let active = self.active_deals(wallets).await?;
            let have = distinct_miners(&active);
            if have.len() >= target || timed_out || round == self.exec.config.max_deal_rounds {
                break active;
            }
            round += 1;

            let mut constraints = SelectConstraints::from_config(fil, piece_size(size));
            constraints.exclude(have.iter().cloned());
            constraints.exclude(self.deal_errors.iter().map(|e| e.miner.clone()));
            let selector = &self.exec.caps.selector;
            let need = target - have.len();
            let proposals = self
                .call("select miners", || selector.select(&constraints, need))
                .await?;
            if proposals.is_empty() {
                self.note("no more eligible miners");
                break active;
            }

            self.note(format!("proposing {} deals", proposals.len()));
            let cold = &self.exec.caps.cold;
            let params = DealParams::from_config(fil);
            let outcome = self
                .call("propose deals", || cold.store(cid, &proposals, &params))
                .await?;
            for rejected in outcome.rejected {
                self.note(format!(
                    "miner {} rejected the proposal: {}",
                    rejected.miner, rejected.message
                ));
                self.deal_errors.push(rejected);
            }
            self.persist_progress();
            if !outcome.started.is_empty() {
                timed_out = self.track(&outcome.started, deadline).await?;
            }
        };

        let have = distinct_miners(&active).len();
        if have < target {
            let (kind, why) = if timed_out {
                (ErrorKind::DealTimedOut, "deals did not become active in time")
            } else {
                (ErrorKind::PartialColdReplication, "not enough miners stored the data")
            };
            return Err(Abort::Fail(PowError::new(
                kind,
                format!("{have} of {target} replicas active: {why}"),
            )));
        }

        Ok(ColdInfo {
            enabled: true,
            filecoin: FilInfo {
                data_cid: Some(cid.clone()),
                size,
                proposals: active,
            },
        })
    }

    /// Propose successors for active deals that expire within the renew
    /// threshold. Returns whether tracking the successors timed out.
    async fn renew_expiring(
        &mut self,
        fil: &FilConfig,
        wallets: &[String],
        deadline: Instant,
    ) -> Result<bool, Abort> {
        let cold = &self.exec.caps.cold;
        let cid = &self.job.cid;
        let height = self.call("chain height", || cold.height()).await?;
        let active = self.active_deals(wallets).await?;
        let due: Vec<&FilStorage> = active
            .iter()
            .filter(|d| d.remaining(height) < fil.renew.threshold && !already_renewed(d, &active))
            .collect();
        if due.is_empty() {
            return Ok(false);
        }
        self.note(format!("renewing {} expiring deals", due.len()));

        let params = DealParams::from_config(fil);
        let mut handles = Vec::new();
        for deal in due {
            match self.call("renew deal", || cold.renew(cid, deal, &params)).await {
                Ok(h) => handles.push(h),
                Err(Abort::Fail(e)) => {
                    self.note(format!("renewal with miner {} failed: {e}", deal.miner));
                    self.deal_errors.push(DealError {
                        proposal_cid: Some(deal.proposal_cid.clone()),
                        miner: deal.miner.clone(),
                        message: e.to_string(),
                    });
                }
                Err(abort) => return Err(abort),
            }
        }
        if handles.is_empty() {
            self.persist_progress();
            return Ok(false);
        }
        self.track(&handles, deadline).await
    }

    /// Watch `handles` until each is final or `deadline` passes. Returns
    /// whether the deadline passed with deals still pending.
    async fn track(&mut self, handles: &[DealHandle], deadline: Instant) -> Result<bool, Abort> {
        let stores = &self.exec.stores;
        let (profile, cid) = (self.job.profile_id, &self.job.cid);
        stores.deals.put_started(profile, cid, handles)?;
        for h in handles {
            stores.deals.put_storage_record(&StorageDealRecord {
                root_cid: cid.clone(),
                addr: h.wallet.clone(),
                time: Utc::now(),
                pending: true,
                deal_info: pending_info(h),
            })?;
        }

        let cold = &self.exec.caps.cold;
        let mut updates = self.call("watch deals", || cold.watch(handles)).await?;
        let mut pending: HashMap<&str, &DealHandle> = handles
            .iter()
            .map(|h| (h.proposal_cid.as_str(), h))
            .collect();

        while !pending.is_empty() {
            let next = self
                .guard(tokio::time::timeout_at(deadline, updates.recv()))
                .await?;
            let update = match next {
                Ok(Some(update)) => update,
                Ok(None) => {
                    for h in pending.values() {
                        self.deal_errors.push(DealError {
                            proposal_cid: Some(h.proposal_cid.clone()),
                            miner: h.miner.clone(),
                            message: "deal updates ended before the deal was final".into(),
                        });
                    }
                    self.persist_progress();
                    break;
                }
                Err(_) => {
                    let timeout = self.exec.config.deal_finality_timeout;
                    for h in pending.values() {
                        self.note(format!("deal {} with miner {} timed out", h.proposal_cid, h.miner));
                        self.deal_errors.push(DealError {
                            proposal_cid: Some(h.proposal_cid.clone()),
                            miner: h.miner.clone(),
                            message: format!(
                                "{}: not active after {timeout:?}",
                                ErrorKind::DealTimedOut
                            ),
                        });
                    }
                    self.persist_progress();
                    return Ok(true);
                }
            };

            if !update.state.is_terminal() {
                self.note(format!(
                    "deal {} with miner {} is {}",
                    update.proposal_cid, update.miner, update.state
                ));
                continue;
            }
            let Some(handle) = pending.remove(update.proposal_cid.as_str()) else {
                continue;
            };
            if update.state == DealState::Active {
                let info = active_info(handle, &update);
                self.note(format!(
                    "deal {} active with miner {}",
                    info.proposal_cid, info.miner
                ));
                stores.deals.put_storage_record(&StorageDealRecord {
                    root_cid: cid.clone(),
                    addr: handle.wallet.clone(),
                    time: Utc::now(),
                    pending: false,
                    deal_info: info.clone(),
                })?;
                self.deal_info.push(info);
            } else {
                let message = update
                    .message
                    .clone()
                    .unwrap_or_else(|| "deal failed".into());
                self.note(format!(
                    "deal {} with miner {} failed: {message}",
                    update.proposal_cid, update.miner
                ));
                self.deal_errors.push(DealError {
                    proposal_cid: Some(update.proposal_cid.clone()),
                    miner: update.miner.clone(),
                    message,
                });
            }
            self.persist_progress();
        }

        stores.deals.clear_started(profile, cid)?;
        Ok(false)
    }
}
