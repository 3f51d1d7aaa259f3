//! # Deal Records API

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use pow_core::rpc::DealRecordsFilter;
use pow_core::{RetrievalDealRecord, StorageDealRecord};

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/deals/storage", post(storage_records))
        .route("/v1/deals/retrieval", post(retrieval_records))
}

/// POST /v1/deals/storage
async fn storage_records(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<DealRecordsFilter>, JsonRejection>,
) -> Result<Json<Vec<StorageDealRecord>>, AppError> {
    let filter = extract_json(body)?;
    Ok(Json(state.powergate.storage_deal_records(caller.0, &filter)?))
}

/// POST /v1/deals/retrieval
async fn retrieval_records(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<DealRecordsFilter>, JsonRejection>,
) -> Result<Json<Vec<RetrievalDealRecord>>, AppError> {
    let filter = extract_json(body)?;
    Ok(Json(state.powergate.retrieval_deal_records(caller.0, &filter)?))
}
