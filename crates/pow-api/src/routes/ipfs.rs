//! # IPFS-Add Proxy
//!
//! `POST /ipfs/add` stages a raw body for the profile named by the
//! `x-ipfs-ffs-auth` header. Folder uploads add each file here, then a
//! `dag-json` directory manifest whose cid stands for the folder.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use pow_core::rpc::StageResponse;

use super::data::StageQuery;
use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::extract_query;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ipfs/add", post(add))
}

async fn add(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<StageQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Json<StageResponse>, AppError> {
    let codec = extract_query(query)?.codec()?;
    let size = body.len();
    let cid = state.powergate.stage(caller.0, body, codec).await?;
    tracing::debug!(profile_id = %caller.0, cid = %cid, size, "ipfs add");
    Ok(Json(StageResponse { cid }))
}
