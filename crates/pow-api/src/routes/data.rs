//! # Data API
//!
//! Staging bytes into the hot tier, retrieving them, cid logs, and
//! replacing one cid's storage with another's.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use pow_core::rpc::{JobIdResponse, ReplaceRequest, StageCidRequest, StageResponse};
use pow_core::{Cid, CidInfo, Codec, JobId};
use serde::Deserialize;

use super::NO_CONTENT;
use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_query};
use crate::state::AppState;
use crate::stream::ndjson;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/data/stage", post(stage))
        .route("/v1/data/stage-cid", post(stage_cid))
        .route("/v1/data/replace", post(replace))
        .route("/v1/data/{cid}", get(get_data))
        .route("/v1/data/{cid}/logs", get(watch_logs))
        .route("/v1/data/{cid}/info", get(cid_info))
}

/// Optional codec of staged bytes; `raw` when absent.
#[derive(Debug, Default, Deserialize)]
pub struct StageQuery {
    #[serde(default)]
    pub codec: Option<String>,
}

impl StageQuery {
    pub fn codec(&self) -> Result<Codec, AppError> {
        match self.codec.as_deref() {
            None | Some("") => Ok(Codec::Raw),
            Some(name) => Ok(name.parse()?),
        }
    }
}

pub(crate) fn parse_cid(raw: &str) -> Result<Cid, AppError> {
    Ok(raw.parse::<Cid>()?)
}

/// POST /v1/data/stage: raw request body.
async fn stage(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<StageQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<StageResponse>, AppError> {
    let codec = extract_query(query)?.codec()?;
    let cid = state.powergate.stage(caller.0, body, codec).await?;
    Ok(Json(StageResponse { cid }))
}

/// POST /v1/data/stage-cid
async fn stage_cid(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<StageCidRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let req = extract_json(body)?;
    state.powergate.stage_cid(caller.0, &req.cid).await?;
    Ok(NO_CONTENT)
}

/// POST /v1/data/replace
async fn replace(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<ReplaceRequest>, JsonRejection>,
) -> Result<Json<JobIdResponse>, AppError> {
    let req = extract_json(body)?;
    let job_id = state.powergate.replace(caller.0, req.cid1, req.cid2).await?;
    Ok(Json(JobIdResponse { job_id }))
}

/// GET /v1/data/{cid}: the stored bytes.
async fn get_data(
    State(state): State<AppState>,
    caller: Caller,
    Path(cid): Path<String>,
) -> Result<Response, AppError> {
    let cid = parse_cid(&cid)?;
    let data = state.powergate.get_data(caller.0, &cid).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from(data),
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub job_id: Option<JobId>,
    /// Replay stored entries before following new ones.
    #[serde(default)]
    pub history: bool,
}

/// GET /v1/data/{cid}/logs: ndjson stream of log entries.
async fn watch_logs(
    State(state): State<AppState>,
    caller: Caller,
    Path(cid): Path<String>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let cid = parse_cid(&cid)?;
    let query = extract_query(query)?;

    // Subscribe before reading history so no entry falls in between.
    let rx = state.powergate.watch_logs(caller.0, &cid);
    let history = if query.history {
        state.powergate.logs(caller.0, &cid, query.job_id)?
    } else {
        Vec::new()
    };
    let last = history.last().map(|e| e.timestamp);
    let replayed = Arc::new(history.clone());
    let job_id = query.job_id;

    let live = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) })
        .filter(move |entry| {
            let wanted = job_id.map_or(true, |id| entry.job_id == Some(id));
            let repeat = last.is_some_and(|ts| entry.timestamp <= ts) && replayed.contains(entry);
            futures::future::ready(wanted && !repeat)
        });
    Ok(ndjson(stream::iter(history).chain(live)))
}

/// GET /v1/data/{cid}/info
async fn cid_info(
    State(state): State<AppState>,
    caller: Caller,
    Path(cid): Path<String>,
) -> Result<Json<CidInfo>, AppError> {
    let cid = parse_cid(&cid)?;
    Ok(Json(state.powergate.storage_info(caller.0, &cid)?))
}
