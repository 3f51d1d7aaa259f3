//! # Storage Config API

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use pow_core::rpc::{ApplyRequest, ConfigResponse, JobIdResponse, RemoveRequest};

use super::NO_CONTENT;
use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/storage-config/apply", post(apply))
        .route("/v1/storage-config/remove", post(remove))
        .route(
            "/v1/storage-config/default",
            get(default_config).put(set_default_config),
        )
}

/// POST /v1/storage-config/apply
async fn apply(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<ApplyRequest>, JsonRejection>,
) -> Result<Json<JobIdResponse>, AppError> {
    let req = extract_json(body)?;
    let job_id = state
        .powergate
        .apply(caller.0, req.cid, req.config, req.override_config)
        .await?;
    Ok(Json(JobIdResponse { job_id }))
}

/// POST /v1/storage-config/remove
async fn remove(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<RemoveRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let req = extract_json(body)?;
    state.powergate.remove(caller.0, &req.cid)?;
    Ok(NO_CONTENT)
}

/// GET /v1/storage-config/default
async fn default_config(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ConfigResponse>, AppError> {
    let config = state.powergate.default_config(caller.0)?;
    Ok(Json(ConfigResponse { config }))
}

/// PUT /v1/storage-config/default
async fn set_default_config(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<ConfigResponse>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let req = extract_json(body)?;
    state.powergate.set_default_config(caller.0, req.config)?;
    Ok(NO_CONTENT)
}
