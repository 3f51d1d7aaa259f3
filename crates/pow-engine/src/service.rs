//! # Powergate Service
//!
//! The profile-scoped facade the RPC layer calls. Every user operation
//! takes the caller's [`ProfileId`], resolved from its auth token, and only
//! sees that profile's cids, jobs, and addresses. Admin operations take no
//! profile.
//!
//! All methods return [`PowError`], whose kind the RPC layer maps onto a
//! status code.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use pow_core::rpc::{DealRecordsFilter, ListJobsQuery, ListJobsResponse, NewAddrRequest};
use pow_core::{
    AddrInfo, Cid, CidInfo, Codec, ErrorKind, JobId, JobsSummary, LogEntry, PowError, ProfileId,
    RetrievalDealRecord, StorageConfig, StorageDealRecord, StorageJob, StorageProfile,
};
use pow_store::{CancelOutcome, JobQuery, JobWatch, Stores, WatchFilter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::error::CapabilityError;
use crate::reconciler::Reconciler;
use crate::scheduler::Scheduler;

const DEFAULT_ADDR_TYPE: &str = "bls";

/// One Powergate instance: stores, back-ends, scheduler, and reconciler.
#[derive(Debug, Clone)]
pub struct Powergate {
    stores: Stores,
    caps: Capabilities,
    config: EngineConfig,
    scheduler: Scheduler,
    reconciler: Arc<Reconciler>,
    reconcile_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Powergate {
    pub fn new(stores: Stores, caps: Capabilities, config: EngineConfig) -> Self {
        let scheduler = Scheduler::new(stores.clone(), caps.clone(), config.clone());
        let reconciler = Arc::new(Reconciler::new(scheduler.clone(), caps.clone()));
        Self {
            stores,
            caps,
            config,
            scheduler,
            reconciler,
            reconcile_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the worker pool and the periodic reconciler.
    pub fn start(&self) -> Result<(), PowError> {
        self.scheduler.start()?;
        let mut task = self.reconcile_task.lock();
        if task.is_none() {
            *task = Some(Arc::clone(&self.reconciler).spawn(self.config.reconcile_interval));
        }
        Ok(())
    }

    pub async fn shutdown(&self, grace: Duration) {
        self.scheduler.shutdown(grace).await;
        let task = self.reconcile_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    // ── Profiles ────────────────────────────────────────────────────

    /// Resolve a user token. A missing token is `UNAUTHENTICATED`, an
    /// unknown one `PERMISSION_DENIED`.
    pub fn authenticate(&self, token: Option<&str>) -> Result<ProfileId, PowError> {
        let token = token.map(str::trim).unwrap_or_default();
        if token.is_empty() {
            return Err(PowError::new(ErrorKind::Unauthenticated, "missing auth token"));
        }
        self.stores
            .profiles
            .by_token(token)?
            .ok_or_else(|| PowError::new(ErrorKind::PermissionDenied, "invalid auth token"))
    }

    /// Create a profile with a fresh wallet address. Returns the profile
    /// and its auth token.
    pub async fn create_profile(&self) -> Result<(StorageProfile, String), PowError> {
        let addr = self
            .caps
            .wallet
            .new_address(DEFAULT_ADDR_TYPE)
            .await
            .map_err(|e| e.context("create wallet address"))?;
        let first = AddrInfo {
            name: "Initial Address".into(),
            addr,
            addr_type: DEFAULT_ADDR_TYPE.into(),
        };
        Ok(self
            .stores
            .profiles
            .create(first, self.config.default_storage_config.clone())?)
    }

    pub fn profile(&self, id: ProfileId) -> Result<StorageProfile, PowError> {
        self.stores
            .profiles
            .get(id)?
            .ok_or_else(|| PowError::not_found(format!("profile {id}")))
    }

    pub fn list_profiles(&self) -> Result<Vec<StorageProfile>, PowError> {
        Ok(self.stores.profiles.list()?)
    }

    pub fn default_config(&self, profile: ProfileId) -> Result<StorageConfig, PowError> {
        Ok(self.profile(profile)?.default_config)
    }

    pub fn set_default_config(
        &self,
        profile: ProfileId,
        config: StorageConfig,
    ) -> Result<(), PowError> {
        let owner = self.profile(profile)?;
        config.validate()?;
        if config.cold.enabled && !owner.owns_addr(&config.cold.filecoin.addr) {
            return Err(PowError::invalid_argument(format!(
                "address {} is not owned by the profile",
                config.cold.filecoin.addr
            )));
        }
        self.stores.profiles.set_default_config(profile, config)?;
        Ok(())
    }

    // ── Data ────────────────────────────────────────────────────────

    /// Deadline for hot-tier adds, from the profile's default config.
    fn add_timeout(&self, profile: ProfileId) -> Result<Duration, PowError> {
        let secs = match self.default_config(profile)?.hot.ipfs.add_timeout_s {
            0 => StorageConfig::default().hot.ipfs.add_timeout_s,
            s => s,
        };
        Ok(Duration::from_secs(secs))
    }

    /// Add bytes to the hot tier without configuring them.
    pub async fn stage(&self, profile: ProfileId, data: Bytes, codec: Codec) -> Result<Cid, PowError> {
        let size = data.len();
        let timeout = self.add_timeout(profile)?;
        let cid = tokio::time::timeout(timeout, self.caps.hot.stage(data, codec))
            .await
            .unwrap_or(Err(CapabilityError::Timeout(timeout)))
            .map_err(|e| e.context("stage"))?;
        tracing::debug!(profile_id = %profile, cid = %cid, size, "staged data");
        Ok(cid)
    }

    pub async fn stage_cid(&self, profile: ProfileId, cid: &Cid) -> Result<(), PowError> {
        let timeout = self.add_timeout(profile)?;
        tokio::time::timeout(timeout, self.caps.hot.stage_cid(cid))
            .await
            .unwrap_or(Err(CapabilityError::Timeout(timeout)))
            .map_err(|e| e.context("stage cid"))?;
        tracing::debug!(profile_id = %profile, cid = %cid, "staged cid");
        Ok(())
    }

    pub async fn apply(
        &self,
        profile: ProfileId,
        cid: Cid,
        config: Option<StorageConfig>,
        override_existing: bool,
    ) -> Result<JobId, PowError> {
        self.scheduler
            .apply_config(profile, cid, config, override_existing)
            .await
    }

    /// Forget a cid. Its config must have both tiers disabled.
    pub fn remove(&self, profile: ProfileId, cid: &Cid) -> Result<(), PowError> {
        Ok(self.stores.cids.remove(profile, cid)?)
    }

    pub async fn replace(&self, profile: ProfileId, cid1: Cid, cid2: Cid) -> Result<JobId, PowError> {
        self.scheduler.replace_data(profile, cid1, cid2).await
    }

    /// Bytes of a cid the profile stores in the hot tier.
    pub async fn get_data(&self, profile: ProfileId, cid: &Cid) -> Result<Bytes, PowError> {
        let hot_enabled = self
            .stores
            .cids
            .get_info(profile, cid)?
            .map_or(false, |info| info.hot.enabled);
        if !hot_enabled {
            return Err(PowError::not_found(format!("{cid} is not in hot storage")));
        }
        self.caps
            .hot
            .get(cid)
            .await
            .map_err(|e| e.context("get"))
    }

    /// Stored log entries of a cid, optionally only those of one job.
    pub fn logs(
        &self,
        profile: ProfileId,
        cid: &Cid,
        job_id: Option<JobId>,
    ) -> Result<Vec<LogEntry>, PowError> {
        let mut entries = self.stores.logs.get(profile, cid)?;
        if let Some(id) = job_id {
            entries.retain(|e| e.job_id == Some(id));
        }
        Ok(entries)
    }

    /// New log entries of a cid as they are written.
    pub fn watch_logs(&self, profile: ProfileId, cid: &Cid) -> mpsc::Receiver<LogEntry> {
        self.stores.logs.watch(profile, cid)
    }

    // ── Jobs ────────────────────────────────────────────────────────

    pub fn job(&self, profile: ProfileId, id: JobId) -> Result<StorageJob, PowError> {
        self.stores
            .jobs
            .get(id)?
            .filter(|j| j.profile_id == profile)
            .ok_or_else(|| PowError::not_found(format!("storage job {id}")))
    }

    /// The config snapshot a job was created with.
    pub fn config_for_job(&self, profile: ProfileId, id: JobId) -> Result<StorageConfig, PowError> {
        Ok(self.job(profile, id)?.config)
    }

    /// List jobs of one profile, or of all profiles for admins.
    pub fn list_jobs(
        &self,
        profile: Option<ProfileId>,
        query: &ListJobsQuery,
    ) -> Result<ListJobsResponse, PowError> {
        let limit = match query.limit {
            Some(n) if n < 0 => {
                return Err(PowError::invalid_argument("limit must not be negative"));
            }
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
            None => 0,
        };
        let page = self.stores.jobs.list(&JobQuery {
            profile_id: profile,
            cid: query.cid.clone(),
            select: query.select,
            limit,
            ascending: query.ascending,
            page_token: query.next_page_token.clone(),
        })?;
        Ok(ListJobsResponse {
            jobs: page.jobs,
            next_page_token: page.next_page_token,
        })
    }

    pub fn cancel_job(&self, profile: ProfileId, id: JobId) -> Result<CancelOutcome, PowError> {
        self.job(profile, id)?;
        self.scheduler.cancel(id)
    }

    /// Watch jobs of the profile; an empty `ids` watches all of them.
    pub fn watch_jobs(&self, profile: ProfileId, ids: Vec<JobId>) -> JobWatch {
        self.scheduler.watch(WatchFilter {
            profile_id: Some(profile),
            ..WatchFilter::jobs(ids)
        })
    }

    pub fn summary(&self, profile: ProfileId, cids: &[Cid]) -> Result<JobsSummary, PowError> {
        self.scheduler.summary(profile, cids)
    }

    // ── Storage info ────────────────────────────────────────────────

    pub fn storage_info(&self, profile: ProfileId, cid: &Cid) -> Result<CidInfo, PowError> {
        self.stores
            .cids
            .get_info(profile, cid)?
            .ok_or_else(|| PowError::not_found(format!("storage info for {cid}")))
    }

    /// Info of one profile, or of all profiles for admins, optionally
    /// restricted to `cids`.
    pub fn list_storage_info(
        &self,
        profile: Option<ProfileId>,
        cids: &[Cid],
    ) -> Result<Vec<CidInfo>, PowError> {
        let infos = match profile {
            Some(p) => self.stores.cids.list(p, cids)?,
            None => {
                let mut all = self.stores.cids.list_all()?;
                if !cids.is_empty() {
                    all.retain(|i| cids.contains(&i.cid));
                }
                all
            }
        };
        Ok(infos)
    }

    // ── Deal records ────────────────────────────────────────────────

    /// The addresses a record query covers: the requested ones, which the
    /// profile must own, or all of the profile's.
    fn record_addrs(
        &self,
        profile: ProfileId,
        filter: &DealRecordsFilter,
    ) -> Result<Vec<String>, PowError> {
        let owner = self.profile(profile)?;
        if filter.addrs.is_empty() {
            return Ok(owner.addr_list());
        }
        if let Some(foreign) = filter.addrs.iter().find(|a| !owner.owns_addr(a)) {
            return Err(PowError::invalid_argument(format!(
                "address {foreign} is not owned by the profile"
            )));
        }
        Ok(filter.addrs.clone())
    }

    pub fn storage_deal_records(
        &self,
        profile: ProfileId,
        filter: &DealRecordsFilter,
    ) -> Result<Vec<StorageDealRecord>, PowError> {
        let addrs = self.record_addrs(profile, filter)?;
        Ok(self.stores.deals.storage_records(&addrs, filter)?)
    }

    pub fn retrieval_deal_records(
        &self,
        profile: ProfileId,
        filter: &DealRecordsFilter,
    ) -> Result<Vec<RetrievalDealRecord>, PowError> {
        let addrs = self.record_addrs(profile, filter)?;
        Ok(self.stores.deals.retrieval_records(&addrs, filter)?)
    }

    // ── Wallet ──────────────────────────────────────────────────────

    fn require_owned(&self, profile: ProfileId, addr: &str) -> Result<(), PowError> {
        if self.profile(profile)?.owns_addr(addr) {
            Ok(())
        } else {
            Err(PowError::invalid_argument(format!(
                "address {addr} is not owned by the profile"
            )))
        }
    }

    pub async fn balance(&self, addr: &str) -> Result<u64, PowError> {
        self.caps
            .wallet
            .balance(addr)
            .await
            .map_err(|e| e.context("balance"))
    }

    /// Create an address for the profile.
    pub async fn new_addr(&self, profile: ProfileId, req: NewAddrRequest) -> Result<String, PowError> {
        if req.name.trim().is_empty() {
            return Err(PowError::invalid_argument("address name must not be empty"));
        }
        self.profile(profile)?;
        let addr_type = req.addr_type.unwrap_or_else(|| DEFAULT_ADDR_TYPE.into());
        let addr = self
            .caps
            .wallet
            .new_address(&addr_type)
            .await
            .map_err(|e| e.context("new address"))?;
        let info = AddrInfo {
            name: req.name,
            addr: addr.clone(),
            addr_type,
        };
        self.stores
            .profiles
            .add_addr(profile, info, req.make_default)?;
        tracing::info!(profile_id = %profile, addr = %addr, "created wallet address");
        Ok(addr)
    }

    pub fn addrs(&self, profile: ProfileId) -> Result<Vec<AddrInfo>, PowError> {
        Ok(self.profile(profile)?.addrs)
    }

    pub async fn send_fil(
        &self,
        profile: ProfileId,
        from: &str,
        to: &str,
        amount: u64,
    ) -> Result<(), PowError> {
        self.require_owned(profile, from)?;
        self.caps
            .wallet
            .send(from, to, amount)
            .await
            .map_err(|e| e.context("send"))
    }

    pub async fn sign(
        &self,
        profile: ProfileId,
        addr: &str,
        message: &[u8],
    ) -> Result<Vec<u8>, PowError> {
        self.require_owned(profile, addr)?;
        self.caps
            .wallet
            .sign(addr, message)
            .await
            .map_err(|e| e.context("sign"))
    }

    pub async fn verify(
        &self,
        addr: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, PowError> {
        self.caps
            .wallet
            .verify(addr, message, signature)
            .await
            .map_err(|e| e.context("verify"))
    }

    // ── Admin ───────────────────────────────────────────────────────

    /// Every address the wallet back-end holds.
    pub async fn fleet_addrs(&self) -> Result<Vec<String>, PowError> {
        self.caps
            .wallet
            .list()
            .await
            .map_err(|e| e.context("list addresses"))
    }

    pub async fn fleet_new_addr(&self, addr_type: Option<&str>) -> Result<String, PowError> {
        self.caps
            .wallet
            .new_address(addr_type.unwrap_or(DEFAULT_ADDR_TYPE))
            .await
            .map_err(|e| e.context("new address"))
    }
}
