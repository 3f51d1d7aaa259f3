//! # Admin API
//!
//! Profile management, fleet-level wallet addresses, and listings across
//! all profiles. Guarded by the admin token, not by a profile token.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use pow_core::rpc::{
    CreateProfileResponse, FleetNewAddrRequest, ListJobsQuery, ListJobsResponse, NewAddrResponse,
    StorageInfosResponse,
};
use pow_core::StorageProfile;

use super::jobs::CidsQuery;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_query};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/admin/profiles",
            get(list_profiles).post(create_profile),
        )
        .route(
            "/v1/admin/wallet/addrs",
            get(fleet_addrs).post(fleet_new_addr),
        )
        .route("/v1/admin/storage-jobs", get(list_jobs))
        .route("/v1/admin/storage-info", get(list_storage_info))
}

/// POST /v1/admin/profiles
async fn create_profile(
    State(state): State<AppState>,
) -> Result<Json<CreateProfileResponse>, AppError> {
    let (profile, token) = state.powergate.create_profile().await?;
    tracing::info!(profile_id = %profile.id, "created storage profile");
    Ok(Json(CreateProfileResponse {
        id: profile.id,
        token,
    }))
}

/// GET /v1/admin/profiles
async fn list_profiles(
    State(state): State<AppState>,
) -> Result<Json<Vec<StorageProfile>>, AppError> {
    Ok(Json(state.powergate.list_profiles()?))
}

/// GET /v1/admin/wallet/addrs
async fn fleet_addrs(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.powergate.fleet_addrs().await?))
}

/// POST /v1/admin/wallet/addrs
async fn fleet_new_addr(
    State(state): State<AppState>,
    body: Result<Json<FleetNewAddrRequest>, JsonRejection>,
) -> Result<Json<NewAddrResponse>, AppError> {
    let req = extract_json(body)?;
    let addr = state
        .powergate
        .fleet_new_addr(req.addr_type.as_deref())
        .await?;
    Ok(Json(NewAddrResponse { addr }))
}

/// GET /v1/admin/storage-jobs
async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<ListJobsResponse>, AppError> {
    let query = extract_query(query)?;
    Ok(Json(state.powergate.list_jobs(None, &query)?))
}

/// GET /v1/admin/storage-info?cids=
async fn list_storage_info(
    State(state): State<AppState>,
    query: Result<Query<CidsQuery>, QueryRejection>,
) -> Result<Json<StorageInfosResponse>, AppError> {
    let cids = extract_query(query)?.cids()?;
    let infos = state.powergate.list_storage_info(None, &cids)?;
    Ok(Json(StorageInfosResponse { infos }))
}
