//! # Storage Jobs API
//!
//! Job lookups, listing, summaries, cancellation, and a watch stream.
//!
//! The watch stream first replays the current snapshot of each requested
//! job, then follows live updates. It never sends a job status lower than
//! one already sent for that job, and it ends once every requested job has
//! been seen in a terminal status. Watching with no ids follows all of the
//! caller's jobs until the client disconnects.

use std::collections::{HashMap, HashSet, VecDeque};

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use pow_core::rpc::{ConfigResponse, ListJobsQuery, ListJobsResponse};
use pow_core::{Cid, JobId, JobsSummary, StorageJob};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::NO_CONTENT;
use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_query, parse_list};
use crate::state::AppState;
use crate::stream::ndjson;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/storage-jobs", get(list_jobs))
        .route("/v1/storage-jobs/watch", get(watch_jobs))
        .route("/v1/storage-jobs/summary", get(summary))
        .route("/v1/storage-jobs/{id}", get(get_job))
        .route("/v1/storage-jobs/{id}/config", get(job_config))
        .route("/v1/storage-jobs/{id}/cancel", post(cancel_job))
}

fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    Ok(raw.parse::<JobId>()?)
}

/// GET /v1/storage-jobs
async fn list_jobs(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<ListJobsResponse>, AppError> {
    let query = extract_query(query)?;
    Ok(Json(state.powergate.list_jobs(Some(caller.0), &query)?))
}

/// GET /v1/storage-jobs/{id}
async fn get_job(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<StorageJob>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.powergate.job(caller.0, id)?))
}

/// GET /v1/storage-jobs/{id}/config
async fn job_config(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ConfigResponse>, AppError> {
    let id = parse_job_id(&id)?;
    let config = state.powergate.config_for_job(caller.0, id)?;
    Ok(Json(ConfigResponse { config }))
}

/// POST /v1/storage-jobs/{id}/cancel
async fn cancel_job(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_job_id(&id)?;
    let outcome = state.powergate.cancel_job(caller.0, id)?;
    tracing::info!(job_id = %id, ?outcome, "cancel requested");
    Ok(NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct CidsQuery {
    /// Comma-separated cids.
    #[serde(default)]
    pub cids: Option<String>,
}

impl CidsQuery {
    pub fn cids(&self) -> Result<Vec<Cid>, AppError> {
        parse_list(self.cids.as_deref())
    }
}

/// GET /v1/storage-jobs/summary?cids=
async fn summary(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<CidsQuery>, QueryRejection>,
) -> Result<Json<JobsSummary>, AppError> {
    let cids = extract_query(query)?.cids()?;
    Ok(Json(state.powergate.summary(caller.0, &cids)?))
}

// ── Watch ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct WatchQuery {
    /// Comma-separated job ids.
    #[serde(default)]
    pub job_ids: Option<String>,
}

/// Ordering and termination state of one job watch stream.
struct JobFeed {
    pending: VecDeque<StorageJob>,
    rx: mpsc::Receiver<StorageJob>,
    sent: HashMap<JobId, StorageJob>,
    /// Requested jobs not yet seen terminal. Unused when following all.
    open: HashSet<JobId>,
    follow_all: bool,
}

impl JobFeed {
    fn finished(&self) -> bool {
        !self.follow_all && self.open.is_empty()
    }

    /// Whether `job` moves its watcher forward. Records it if so.
    fn admit(&mut self, job: &StorageJob) -> bool {
        if let Some(prev) = self.sent.get(&job.id) {
            if job.status.rank() < prev.status.rank() || prev == job {
                return false;
            }
        }
        if job.status.is_terminal() {
            self.open.remove(&job.id);
        }
        self.sent.insert(job.id, job.clone());
        true
    }

    async fn next(mut self) -> Option<(StorageJob, Self)> {
        loop {
            if self.finished() {
                return None;
            }
            let job = match self.pending.pop_front() {
                Some(job) => job,
                None => self.rx.recv().await?,
            };
            if self.admit(&job) {
                return Some((job, self));
            }
        }
    }
}

/// GET /v1/storage-jobs/watch?job_ids=a,b: ndjson stream of job snapshots.
async fn watch_jobs(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<WatchQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let ids: Vec<JobId> = parse_list(extract_query(query)?.job_ids.as_deref())?;

    // Subscribe before taking snapshots so no transition falls in between.
    let watch = state.powergate.watch_jobs(caller.0, ids.clone());
    let pending = ids
        .iter()
        .map(|id| state.powergate.job(caller.0, *id))
        .collect::<Result<VecDeque<_>, _>>()?;

    let feed = JobFeed {
        pending,
        rx: watch.into_inner(),
        sent: HashMap::new(),
        open: ids.iter().copied().collect(),
        follow_all: ids.is_empty(),
    };
    Ok(ndjson(stream::unfold(feed, JobFeed::next)))
}
