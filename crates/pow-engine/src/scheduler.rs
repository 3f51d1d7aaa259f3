//! # Scheduler
//!
//! Admission, the worker pool, and job observation.
//!
//! ## Single flight
//!
//! At most one job per `(profile, cid)` executes at a time. Workers claim
//! jobs through [`JobStore::dequeue`](pow_store::JobStore::dequeue) with a
//! closure that reserves the key in the in-flight map; a job whose key is
//! taken stays `QUEUED` and is picked up after the running job releases it.
//!
//! Admission paths (`apply_config`, `replace_data`, reconciler enqueues)
//! serialize per key on an async mutex, and cancel any live job for the
//! key before enqueuing, so at most one non-terminal job per key exists.
//!
//! ## Lifecycle
//!
//! [`Scheduler::start`] re-queues jobs orphaned by a previous process and
//! spawns `max_parallel` workers. [`Scheduler::shutdown`] lets workers
//! finish within a grace period and aborts the rest; their jobs stay
//! `EXECUTING` and are recovered on the next start.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use pow_core::{
    Cid, JobId, JobKey, JobStatus, JobsSummary, PowError, ProfileId, StorageConfig, StorageJob,
};
use pow_store::{CancelOutcome, ClaimedJob, JobWatch, StoreError, Stores, WatchFilter};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::executor::{Executor, JobOutcome};
use crate::metrics;

/// How long admission waits for a canceled job to become terminal.
const CANCEL_WAIT: Duration = Duration::from_secs(60);

/// Public surface for creating and observing jobs.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    stores: Stores,
    executor: Executor,
    config: EngineConfig,
    inflight: DashMap<JobKey, JobId>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    admission: DashMap<JobKey, Arc<tokio::sync::Mutex<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("max_parallel", &self.inner.config.max_parallel)
            .field("inflight", &self.inner.inflight.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(stores: Stores, caps: Capabilities, config: EngineConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                executor: Executor::new(stores.clone(), caps, config.clone()),
                stores,
                config,
                inflight: DashMap::new(),
                wake: Notify::new(),
                shutdown,
                workers: Mutex::new(Vec::new()),
                admission: DashMap::new(),
            }),
        }
    }

    /// Recover orphaned jobs and spawn the worker pool. Must run inside a
    /// tokio runtime. Calling it twice is a no-op.
    pub fn start(&self) -> Result<(), PowError> {
        let mut workers = self.inner.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }
        let recovered = self.inner.stores.jobs.recover_orphaned()?;
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "re-queued jobs from a previous run");
        }
        for n in 0..self.inner.config.max_parallel {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(worker(inner, n)));
        }
        tracing::info!(workers = workers.len(), "scheduler started");
        Ok(())
    }

    /// Stop the workers, aborting any still busy after `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown.send_replace(true);
        self.inner.wake.notify_waiters();
        let handles = std::mem::take(&mut *self.inner.workers.lock());
        let deadline = Instant::now() + grace;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        tracing::info!("scheduler stopped");
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of jobs currently executing in this process.
    pub fn inflight(&self) -> usize {
        self.inner.inflight.len()
    }

    // ── Admission ───────────────────────────────────────────────────

    /// Persist `config` for the cid and enqueue a job reconciling it.
    ///
    /// Without a config the profile default applies. An existing config is
    /// only replaced with `override_existing`. A live job for the cid is
    /// canceled first.
    pub async fn apply_config(
        &self,
        profile: ProfileId,
        cid: Cid,
        config: Option<StorageConfig>,
        override_existing: bool,
    ) -> Result<JobId, PowError> {
        let stores = &self.inner.stores;
        let owner = stores
            .profiles
            .get(profile)?
            .ok_or_else(|| PowError::not_found(format!("profile {profile}")))?;
        let config = config.unwrap_or_else(|| owner.default_config.clone());
        config.validate()?;
        if config.cold.enabled && !owner.owns_addr(&config.cold.filecoin.addr) {
            return Err(PowError::invalid_argument(format!(
                "address {} is not owned by the profile",
                config.cold.filecoin.addr
            )));
        }

        let key = JobKey {
            profile_id: profile,
            cid,
        };
        let lock = self.inner.admission_lock(&key);
        let _guard = lock.lock().await;
        stores
            .cids
            .put_config(profile, &key.cid, &config, override_existing)?;
        self.inner.cancel_live(&key).await?;
        let job = self.inner.enqueue(StorageJob::new(profile, key.cid, config))?;
        Ok(job.id)
    }

    /// Move `cid1`'s config to `cid2` and disable both tiers for `cid1`.
    /// Returns the id of the job for `cid2`.
    pub async fn replace_data(
        &self,
        profile: ProfileId,
        cid1: Cid,
        cid2: Cid,
    ) -> Result<JobId, PowError> {
        if cid1 == cid2 {
            return Err(PowError::invalid_argument("cids must differ"));
        }
        let key1 = JobKey {
            profile_id: profile,
            cid: cid1,
        };
        let key2 = JobKey {
            profile_id: profile,
            cid: cid2,
        };
        // Fixed lock order across keys.
        let (first, second) = if key1 < key2 {
            (self.inner.admission_lock(&key1), self.inner.admission_lock(&key2))
        } else {
            (self.inner.admission_lock(&key2), self.inner.admission_lock(&key1))
        };
        let _g1 = first.lock().await;
        let _g2 = second.lock().await;

        let cids = &self.inner.stores.cids;
        let config = cids
            .get_config(profile, &key1.cid)?
            .ok_or_else(|| PowError::not_found(format!("storage config for {}", key1.cid)))?;
        cids.put_config(profile, &key2.cid, &config, false)?;
        let disabled = config.disabled();
        cids.put_config(profile, &key1.cid, &disabled, true)?;
        self.inner.cancel_live(&key1).await?;

        let new_job = self
            .inner
            .enqueue(StorageJob::new(profile, key2.cid.clone(), config))?;
        self.inner.enqueue(StorageJob::new(profile, key1.cid.clone(), disabled))?;
        tracing::info!(
            profile_id = %profile,
            from = %key1.cid,
            to = %key2.cid,
            "replaced data"
        );
        Ok(new_job.id)
    }

    /// Enqueue a reconciler job unless one is already live for the cid.
    pub async fn enqueue_reconcile(
        &self,
        profile: ProfileId,
        cid: Cid,
        config: StorageConfig,
    ) -> Result<Option<JobId>, PowError> {
        let key = JobKey {
            profile_id: profile,
            cid,
        };
        let lock = self.inner.admission_lock(&key);
        let _guard = lock.lock().await;
        if !self.inner.stores.jobs.live_for(&key)?.is_empty() {
            return Ok(None);
        }
        let job = self
            .inner
            .enqueue(StorageJob::new(profile, key.cid, config).reconciling())?;
        Ok(Some(job.id))
    }

    // ── Observation ─────────────────────────────────────────────────

    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, PowError> {
        let outcome = self.inner.stores.jobs.cancel(id)?;
        tracing::info!(job_id = %id, ?outcome, "cancel requested");
        Ok(outcome)
    }

    pub fn watch(&self, filter: WatchFilter) -> JobWatch {
        self.inner.stores.jobs.watch(filter)
    }

    pub fn summary(&self, profile: ProfileId, cids: &[Cid]) -> Result<JobsSummary, PowError> {
        Ok(self.inner.stores.jobs.summary(profile, cids)?)
    }

    /// Wait until every job in `ids` is terminal, for at most `limit`.
    /// Returns whether they all are.
    pub async fn wait_terminal(&self, ids: &[JobId], limit: Duration) -> Result<bool, PowError> {
        self.inner.wait_terminal(ids, limit).await
    }
}

impl Inner {
    fn admission_lock(&self, key: &JobKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.admission.entry(key.clone()).or_default().value())
    }

    fn enqueue(&self, job: StorageJob) -> Result<StorageJob, StoreError> {
        let job = self.stores.jobs.enqueue(job)?;
        metrics::record_job_enqueued();
        self.wake.notify_one();
        Ok(job)
    }

    /// Cancel every live job of `key` and wait for them to become terminal.
    async fn cancel_live(&self, key: &JobKey) -> Result<(), PowError> {
        let live: Vec<JobId> = self
            .stores
            .jobs
            .live_for(key)?
            .into_iter()
            .map(|j| j.id)
            .collect();
        if live.is_empty() {
            return Ok(());
        }
        for id in &live {
            self.stores.jobs.cancel(*id)?;
        }
        if !self.wait_terminal(&live, CANCEL_WAIT).await? {
            tracing::warn!(key = %key, "canceled jobs still running; enqueuing anyway");
        }
        Ok(())
    }

    async fn wait_terminal(&self, ids: &[JobId], limit: Duration) -> Result<bool, PowError> {
        if ids.is_empty() {
            return Ok(true);
        }
        let mut events = self.stores.jobs.watch(WatchFilter::jobs(ids.iter().copied()));
        let deadline = Instant::now() + limit;
        loop {
            let mut done = true;
            for id in ids {
                if let Some(job) = self.stores.jobs.get(*id)? {
                    if !job.status.is_terminal() {
                        done = false;
                        break;
                    }
                }
            }
            if done {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            // Re-check at least once a second in case an event was dropped.
            let wait = Duration::from_secs(1).min(deadline - Instant::now());
            let _ = tokio::time::timeout(wait, events.recv()).await;
        }
    }

    /// Claim the oldest queued job whose key is free.
    fn claim(&self) -> Result<Option<ClaimedJob>, StoreError> {
        let mut reserved = None;
        let claimed = self.stores.jobs.dequeue(None, |key, id| {
            match self.inflight.entry(key.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(id);
                    reserved = Some(key.clone());
                    true
                }
            }
        });
        if claimed.is_err() {
            if let Some(key) = reserved {
                self.inflight.remove(&key);
            }
        }
        claimed
    }

    async fn run(&self, claimed: ClaimedJob) {
        let ClaimedJob { job, cancel } = claimed;
        tracing::info!(
            job_id = %job.id,
            cid = %job.cid,
            profile_id = %job.profile_id,
            reconcile = job.reconcile,
            "executing job"
        );
        metrics::record_job_started();
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.executor.execute(&job, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(job_id = %job.id, "executor panicked");
                JobOutcome {
                    status: JobStatus::Failed,
                    cause: Some(PowError::internal("executor panicked").to_string()),
                    deal_info: Vec::new(),
                    deal_errors: Vec::new(),
                }
            });
        metrics::record_job_finished(outcome.status, started.elapsed());
        self.finish(&job, outcome).await;
        self.inflight.remove(&job.key());
        self.wake.notify_waiters();
    }

    /// Persist the outcome, retrying write failures. A job whose outcome
    /// cannot be written stays `EXECUTING` until restart recovery.
    async fn finish(&self, job: &StorageJob, outcome: JobOutcome) {
        let attempts = self.config.finish_attempts.max(1);
        let mut delay = self.config.infra_backoff;
        for attempt in 1..=attempts {
            let result = self.stores.jobs.finish(
                job.id,
                outcome.status,
                outcome.cause.clone(),
                outcome.deal_info.clone(),
                outcome.deal_errors.clone(),
            );
            match result {
                Ok(_) => return,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        job_id = %job.id,
                        attempt,
                        error = %e,
                        "failed to persist job outcome, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job.id,
                        error = %e,
                        "giving up on persisting job outcome; left for restart recovery"
                    );
                }
            }
        }
    }
}

async fn worker(inner: Arc<Inner>, n: usize) {
    let mut shutdown = inner.shutdown.subscribe();
    tracing::debug!(worker = n, "worker started");
    loop {
        let stop = *shutdown.borrow();
        if stop {
            break;
        }
        match inner.claim() {
            Ok(Some(claimed)) => inner.run(claimed).await,
            Ok(None) => {
                tokio::select! {
                    _ = inner.wake.notified() => {}
                    _ = tokio::time::sleep(inner.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                tracing::warn!(worker = n, error = %e, "failed to dequeue job");
                tokio::time::sleep(inner.config.poll_interval).await;
            }
        }
    }
    tracing::debug!(worker = n, "worker stopped");
}
