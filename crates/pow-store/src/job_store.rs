//! # Job Store
//!
//! Durable record of every storage job plus an in-memory fan-out bus.
//!
//! ## Layout
//!
//! ```text
//! jobs/<job_id>                                   -> StorageJob (JSON)
//! jobs_by_profile/<profile_id>/<created_ns>/<job_id> -> ""
//! ```
//!
//! `created_ns` is a zero-padded nanosecond timestamp. `enqueue` bumps a
//! job's `created_at` by a nanosecond when it would not be strictly greater
//! than the previous one, so `(created_at, id)` is a total order that list
//! page tokens can encode.
//!
//! ## Concurrency
//!
//! Every state transition runs under one writer lock, which also covers
//! publishing to watchers. Events for one job therefore reach a watcher in
//! transition order. Watchers get a bounded buffer; a full buffer drops the
//! event for that watcher only and bumps `pow_watch_events_dropped_total`.
//!
//! `EXECUTING` means "claimed by this running process". After a restart
//! [`JobStore::recover_orphaned`] moves every `EXECUTING` job back to
//! `QUEUED` and publishes the re-queued snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use pow_core::rpc::ListSelect;
use pow_core::{
    Cid, DealError, DealInfo, JobId, JobKey, JobStatus, JobsSummary, ProfileId, StorageJob,
};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::StoreError;
use crate::kv::{decode, encode, ts_key, BatchOp, Datastore};

/// Per-watcher event buffer.
pub const WATCH_BUFFER: usize = 64;

const JOBS_PREFIX: &str = "jobs/";
const BY_PROFILE_PREFIX: &str = "jobs_by_profile/";

fn job_key(id: JobId) -> String {
    format!("{JOBS_PREFIX}{id}")
}

fn profile_index_key(profile: ProfileId, created_ns: i64, id: JobId) -> String {
    format!("{BY_PROFILE_PREFIX}{profile}/{}/{id}", ts_key(created_ns))
}

fn nanos(at: &DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

// ─── Query types ─────────────────────────────────────────────────────

/// Which jobs a watcher receives.
#[derive(Debug, Clone, Default)]
pub struct WatchFilter {
    /// Restrict to these jobs. Empty means any job.
    pub job_ids: HashSet<JobId>,
    pub profile_id: Option<ProfileId>,
    pub cid: Option<Cid>,
}

impl WatchFilter {
    /// Events for the given jobs.
    pub fn jobs(ids: impl IntoIterator<Item = JobId>) -> Self {
        Self {
            job_ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Events for every job of a profile.
    pub fn profile(profile_id: ProfileId) -> Self {
        Self {
            profile_id: Some(profile_id),
            ..Self::default()
        }
    }

    fn matches(&self, job: &StorageJob) -> bool {
        (self.job_ids.is_empty() || self.job_ids.contains(&job.id))
            && self.profile_id.map_or(true, |p| p == job.profile_id)
            && self.cid.as_ref().map_or(true, |c| *c == job.cid)
    }
}

/// Receiving end of a job watch.
#[derive(Debug)]
pub struct JobWatch {
    rx: mpsc::Receiver<StorageJob>,
}

impl JobWatch {
    /// Next job snapshot. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StorageJob> {
        self.rx.recv().await
    }

    pub fn into_inner(self) -> mpsc::Receiver<StorageJob> {
        self.rx
    }
}

/// A job handed to a worker by [`JobStore::dequeue`].
#[derive(Debug)]
pub struct ClaimedJob {
    /// Snapshot taken right after the move to `EXECUTING`.
    pub job: StorageJob,
    /// Flips to `true` when the job is canceled while executing.
    pub cancel: watch::Receiver<bool>,
}

/// Listing parameters.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub profile_id: Option<ProfileId>,
    pub cid: Option<Cid>,
    pub select: ListSelect,
    /// Zero means no limit.
    pub limit: usize,
    pub ascending: bool,
    /// Opaque token from a previous page.
    pub page_token: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<StorageJob>,
    pub next_page_token: Option<String>,
}

/// Outcome of [`JobStore::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was queued and is now `CANCELED`.
    Canceled,
    /// The job is executing; its cancel bit is set.
    Signaled,
    /// The job was already terminal.
    AlreadyFinal,
}

fn encode_page_token(created_ns: i64, id: JobId) -> String {
    format!("{created_ns}:{id}")
}

fn decode_page_token(token: &str) -> Result<(i64, JobId), StoreError> {
    let invalid = || StoreError::InvalidPageToken(token.to_string());
    let (ts, id) = token.split_once(':').ok_or_else(invalid)?;
    let ts: i64 = ts.parse().map_err(|_| invalid())?;
    let id = Uuid::parse_str(id).map_err(|_| invalid())?;
    Ok((ts, JobId(id)))
}

// ─── Store ───────────────────────────────────────────────────────────

struct Subscriber {
    filter: WatchFilter,
    tx: mpsc::Sender<StorageJob>,
}

struct WriterState {
    /// Queued jobs by `(created_ns, id)`.
    queued: BTreeMap<(i64, JobId), JobKey>,
    last_created_ns: i64,
}

/// Durable job store with watch fan-out.
pub struct JobStore {
    ds: Arc<dyn Datastore>,
    writer: Mutex<WriterState>,
    cancels: DashMap<JobId, watch::Sender<bool>>,
    watchers: Mutex<Vec<Subscriber>>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("queued", &self.writer.lock().queued.len())
            .field("watchers", &self.watchers.lock().len())
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Open the store, rebuilding the in-memory queue from persisted jobs.
    pub fn open(ds: Arc<dyn Datastore>) -> Result<Self, StoreError> {
        let mut queued = BTreeMap::new();
        let mut last_created_ns = 0;
        for (key, bytes) in ds.scan_prefix(JOBS_PREFIX)? {
            let job: StorageJob = decode(&key, &bytes)?;
            let ns = nanos(&job.created_at);
            last_created_ns = last_created_ns.max(ns);
            if job.status == JobStatus::Queued {
                queued.insert((ns, job.id), job.key());
            }
        }
        tracing::debug!(queued = queued.len(), "opened job store");
        Ok(Self {
            ds,
            writer: Mutex::new(WriterState {
                queued,
                last_created_ns,
            }),
            cancels: DashMap::new(),
            watchers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        })
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Persist a new `QUEUED` job. Returns the stored snapshot, whose
    /// `created_at` may have been bumped to keep creation order strict.
    pub fn enqueue(&self, mut job: StorageJob) -> Result<StorageJob, StoreError> {
        if job.status != JobStatus::Queued {
            return Err(StoreError::Transition(pow_core::StateError::InvalidTransition {
                from: job.status.to_string(),
                to: JobStatus::Queued.to_string(),
                reason: "only queued jobs can be enqueued".into(),
            }));
        }
        let mut w = self.writer.lock();
        if self.ds.get(&job_key(job.id))?.is_some() {
            return Err(StoreError::DuplicateJob(job.id));
        }
        let mut ns = nanos(&job.created_at);
        if ns <= w.last_created_ns {
            ns = w.last_created_ns + 1;
            job.created_at = Utc.timestamp_nanos(ns);
        }
        let key = job_key(job.id);
        self.ds.batch(vec![
            BatchOp::Put(key.clone(), encode(&key, &job)?),
            BatchOp::Put(profile_index_key(job.profile_id, ns, job.id), Vec::new()),
        ])?;
        w.last_created_ns = ns;
        w.queued.insert((ns, job.id), job.key());
        metrics::counter!("pow_jobs_enqueued_total").increment(1);
        tracing::debug!(job_id = %job.id, cid = %job.cid, profile_id = %job.profile_id, "job enqueued");
        self.publish(&job);
        Ok(job)
    }

    /// Claim the oldest queued job, optionally within one profile, and mark
    /// it `EXECUTING`.
    ///
    /// `claim` is offered each candidate's key in queue order and returns
    /// whether the caller takes it. Candidates it refuses stay `QUEUED`.
    pub fn dequeue(
        &self,
        profile: Option<ProfileId>,
        mut claim: impl FnMut(&JobKey, JobId) -> bool,
    ) -> Result<Option<ClaimedJob>, StoreError> {
        let mut w = self.writer.lock();
        let mut chosen = None;
        for ((ns, id), key) in w.queued.iter() {
            if profile.map_or(false, |p| p != key.profile_id) {
                continue;
            }
            if claim(key, *id) {
                chosen = Some((*ns, *id));
                break;
            }
        }
        let Some((ns, id)) = chosen else {
            return Ok(None);
        };
        let mut job = self.load(id)?;
        job.start()?;
        self.write(&job)?;
        w.queued.remove(&(ns, id));
        let (tx, rx) = watch::channel(false);
        self.cancels.insert(id, tx);
        metrics::gauge!("pow_executing_jobs").increment(1.0);
        self.publish(&job);
        Ok(Some(ClaimedJob { job, cancel: rx }))
    }

    /// Overwrite the progress fields of an executing job.
    pub fn update_progress(
        &self,
        id: JobId,
        deal_info: Vec<DealInfo>,
        deal_errors: Vec<DealError>,
    ) -> Result<StorageJob, StoreError> {
        let _w = self.writer.lock();
        let mut job = self.load(id)?;
        if job.status != JobStatus::Executing {
            return Err(StoreError::Transition(pow_core::StateError::InvalidTransition {
                from: job.status.to_string(),
                to: job.status.to_string(),
                reason: "progress is only recorded while executing".into(),
            }));
        }
        job.deal_info = deal_info;
        job.deal_errors = deal_errors;
        self.write(&job)?;
        self.publish(&job);
        Ok(job)
    }

    /// Move a job to a terminal status. A job that is already terminal is
    /// returned unchanged.
    pub fn finish(
        &self,
        id: JobId,
        status: JobStatus,
        cause: Option<String>,
        deal_info: Vec<DealInfo>,
        deal_errors: Vec<DealError>,
    ) -> Result<StorageJob, StoreError> {
        let mut w = self.writer.lock();
        let mut job = self.load(id)?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        job.deal_info = deal_info;
        job.deal_errors = deal_errors;
        self.finish_locked(&mut w, job, status, cause)
    }

    /// Cancel a job. Queued jobs are canceled outright; executing jobs get
    /// their cancel bit set and the executor finishes them.
    pub fn cancel(&self, id: JobId) -> Result<CancelOutcome, StoreError> {
        let mut w = self.writer.lock();
        let job = self.load(id)?;
        match job.status {
            JobStatus::Queued => {
                self.finish_locked(&mut w, job, JobStatus::Canceled, None)?;
                Ok(CancelOutcome::Canceled)
            }
            JobStatus::Executing => {
                if let Some(tx) = self.cancels.get(&id) {
                    tx.send_replace(true);
                }
                tracing::debug!(job_id = %id, "cancel requested for executing job");
                Ok(CancelOutcome::Signaled)
            }
            _ => Ok(CancelOutcome::AlreadyFinal),
        }
    }

    /// Move every `EXECUTING` job back to `QUEUED`. Returns the re-queued ids.
    pub fn recover_orphaned(&self) -> Result<Vec<JobId>, StoreError> {
        let mut w = self.writer.lock();
        let mut requeued = Vec::new();
        for (key, bytes) in self.ds.scan_prefix(JOBS_PREFIX)? {
            let mut job: StorageJob = decode(&key, &bytes)?;
            if job.status != JobStatus::Executing || self.cancels.contains_key(&job.id) {
                continue;
            }
            job.requeue()?;
            self.write(&job)?;
            w.queued.insert((nanos(&job.created_at), job.id), job.key());
            tracing::warn!(job_id = %job.id, cid = %job.cid, "re-queued orphaned executing job");
            self.publish(&job);
            requeued.push(job.id);
        }
        Ok(requeued)
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn get(&self, id: JobId) -> Result<Option<StorageJob>, StoreError> {
        let key = job_key(id);
        match self.ds.get(&key)? {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Whether the job's cancel bit is set.
    pub fn is_cancel_requested(&self, id: JobId) -> bool {
        self.cancels.get(&id).map_or(false, |tx| *tx.borrow())
    }

    /// Number of queued jobs.
    pub fn queued_len(&self) -> usize {
        self.writer.lock().queued.len()
    }

    /// Non-terminal jobs for one `(profile, cid)`.
    pub fn live_for(&self, key: &JobKey) -> Result<Vec<StorageJob>, StoreError> {
        Ok(self
            .profile_jobs(key.profile_id)?
            .into_iter()
            .filter(|j| j.cid == key.cid && !j.status.is_terminal())
            .collect())
    }

    /// List jobs, newest first unless `ascending`.
    pub fn list(&self, query: &JobQuery) -> Result<JobPage, StoreError> {
        let mut index = self.index_entries(query.profile_id)?;
        if query.ascending {
            index.sort();
        } else {
            index.sort_by(|a, b| b.cmp(a));
        }
        let after = query
            .page_token
            .as_deref()
            .map(decode_page_token)
            .transpose()?;

        let mut jobs: Vec<StorageJob> = Vec::new();
        let mut next_page_token = None;
        for (ns, id) in index {
            if let Some(cursor) = after {
                let past = if query.ascending {
                    (ns, id) > cursor
                } else {
                    (ns, id) < cursor
                };
                if !past {
                    continue;
                }
            }
            let Some(job) = self.get(id)? else {
                continue;
            };
            if query.cid.as_ref().map_or(false, |c| *c != job.cid) {
                continue;
            }
            let selected = match query.select {
                ListSelect::All => true,
                ListSelect::Queued => job.status == JobStatus::Queued,
                ListSelect::Executing => job.status == JobStatus::Executing,
                ListSelect::Final => job.status.is_terminal(),
            };
            if !selected {
                continue;
            }
            if query.limit > 0 && jobs.len() == query.limit {
                next_page_token = jobs
                    .last()
                    .map(|last| encode_page_token(nanos(&last.created_at), last.id));
                break;
            }
            jobs.push(job);
        }
        Ok(JobPage {
            jobs,
            next_page_token,
        })
    }

    /// Queue counts plus the latest final and latest successful job per cid.
    pub fn summary(&self, profile: ProfileId, cids: &[Cid]) -> Result<JobsSummary, StoreError> {
        let mut jobs = self.profile_jobs(profile)?;
        if !cids.is_empty() {
            jobs.retain(|j| cids.contains(&j.cid));
        }
        let mut queued = Vec::new();
        let mut executing = Vec::new();
        let mut latest_final: HashMap<Cid, StorageJob> = HashMap::new();
        let mut latest_successful: HashMap<Cid, StorageJob> = HashMap::new();
        // Ascending creation order, so later jobs overwrite earlier ones.
        for job in jobs {
            match job.status {
                JobStatus::Queued => queued.push(job),
                JobStatus::Executing => executing.push(job),
                s if s.is_terminal() => {
                    if s == JobStatus::Success {
                        latest_successful.insert(job.cid.clone(), job.clone());
                    }
                    latest_final.insert(job.cid.clone(), job);
                }
                _ => {}
            }
        }
        let mut latest_final: Vec<StorageJob> = latest_final.into_values().collect();
        latest_final.sort_by_key(|j| j.created_at);
        let mut latest_successful: Vec<StorageJob> = latest_successful.into_values().collect();
        latest_successful.sort_by_key(|j| j.created_at);
        Ok(JobsSummary::new(
            queued,
            executing,
            latest_final,
            latest_successful,
        ))
    }

    // ── Watch ───────────────────────────────────────────────────────

    /// Subscribe to job snapshots matching `filter`.
    pub fn watch(&self, filter: WatchFilter) -> JobWatch {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.watchers.lock().push(Subscriber { filter, tx });
        JobWatch { rx }
    }

    /// Events dropped on full watcher buffers since open.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn publish(&self, job: &StorageJob) {
        let mut watchers = self.watchers.lock();
        watchers.retain(|sub| {
            if !sub.filter.matches(job) {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(job.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("pow_watch_events_dropped_total").increment(1);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    // ── Internals ───────────────────────────────────────────────────

    fn finish_locked(
        &self,
        w: &mut WriterState,
        mut job: StorageJob,
        status: JobStatus,
        cause: Option<String>,
    ) -> Result<StorageJob, StoreError> {
        let prior = job.status;
        job.finish(status, cause)?;
        self.write(&job)?;
        match prior {
            JobStatus::Queued => {
                w.queued.remove(&(nanos(&job.created_at), job.id));
            }
            JobStatus::Executing => {
                metrics::gauge!("pow_executing_jobs").decrement(1.0);
            }
            _ => {}
        }
        self.cancels.remove(&job.id);
        metrics::counter!("pow_jobs_finished_total", "status" => status.to_string()).increment(1);
        tracing::info!(
            job_id = %job.id,
            cid = %job.cid,
            status = %job.status,
            cause = job.error_cause.as_deref().unwrap_or(""),
            "job finished"
        );
        self.publish(&job);
        Ok(job)
    }

    fn load(&self, id: JobId) -> Result<StorageJob, StoreError> {
        self.get(id)?.ok_or(StoreError::JobNotFound(id))
    }

    fn write(&self, job: &StorageJob) -> Result<(), StoreError> {
        let key = job_key(job.id);
        self.ds.put(&key, &encode(&key, job)?)
    }

    /// `(created_ns, id)` of jobs, for one profile or all.
    fn index_entries(&self, profile: Option<ProfileId>) -> Result<Vec<(i64, JobId)>, StoreError> {
        let prefix = match profile {
            Some(p) => format!("{BY_PROFILE_PREFIX}{p}/"),
            None => BY_PROFILE_PREFIX.to_string(),
        };
        let mut out = Vec::new();
        for (key, _) in self.ds.scan_prefix(&prefix)? {
            let mut parts = key.rsplitn(3, '/');
            let id = parts.next().and_then(|s| Uuid::parse_str(s).ok());
            let ns = parts.next().and_then(|s| s.parse::<i64>().ok());
            match (ns, id) {
                (Some(ns), Some(id)) => out.push((ns, JobId(id))),
                _ => tracing::warn!(key = %key, "skipping malformed job index key"),
            }
        }
        Ok(out)
    }

    /// A profile's jobs in ascending creation order.
    fn profile_jobs(&self, profile: ProfileId) -> Result<Vec<StorageJob>, StoreError> {
        let mut index = self.index_entries(Some(profile))?;
        index.sort();
        let mut jobs = Vec::with_capacity(index.len());
        for (_, id) in index {
            if let Some(job) = self.get(id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}
