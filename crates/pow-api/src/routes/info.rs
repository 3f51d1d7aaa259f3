//! # Storage Info API

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use pow_core::rpc::StorageInfosResponse;
use pow_core::CidInfo;

use super::data::parse_cid;
use super::jobs::CidsQuery;
use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::extract_query;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/storage-info", get(list_storage_info))
        .route("/v1/storage-info/{cid}", get(storage_info))
}

/// GET /v1/storage-info/{cid}
async fn storage_info(
    State(state): State<AppState>,
    caller: Caller,
    Path(cid): Path<String>,
) -> Result<Json<CidInfo>, AppError> {
    let cid = parse_cid(&cid)?;
    Ok(Json(state.powergate.storage_info(caller.0, &cid)?))
}

/// GET /v1/storage-info?cids=
async fn list_storage_info(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<CidsQuery>, QueryRejection>,
) -> Result<Json<StorageInfosResponse>, AppError> {
    let cids = extract_query(query)?.cids()?;
    let infos = state.powergate.list_storage_info(Some(caller.0), &cids)?;
    Ok(Json(StorageInfosResponse { infos }))
}
