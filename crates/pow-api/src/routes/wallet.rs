//! # Wallet API
//!
//! Messages and signatures travel hex-encoded.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use pow_core::rpc::{
    BalanceResponse, NewAddrRequest, NewAddrResponse, SendFilRequest, SignRequest, SignResponse,
    VerifyRequest, VerifyResponse,
};
use pow_core::AddrInfo;

use super::NO_CONTENT;
use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/wallet/balance/{addr}", get(balance))
        .route("/v1/wallet/addrs", get(addrs).post(new_addr))
        .route("/v1/wallet/send", post(send_fil))
        .route("/v1/wallet/sign", post(sign))
        .route("/v1/wallet/verify", post(verify))
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, AppError> {
    hex::decode(value).map_err(|e| AppError::BadRequest(format!("{field} is not valid hex: {e}")))
}

/// GET /v1/wallet/balance/{addr}
async fn balance(
    State(state): State<AppState>,
    _caller: Caller,
    Path(addr): Path<String>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.powergate.balance(&addr).await?;
    Ok(Json(BalanceResponse { addr, balance }))
}

/// GET /v1/wallet/addrs
async fn addrs(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<AddrInfo>>, AppError> {
    Ok(Json(state.powergate.addrs(caller.0)?))
}

/// POST /v1/wallet/addrs
async fn new_addr(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<NewAddrRequest>, JsonRejection>,
) -> Result<Json<NewAddrResponse>, AppError> {
    let req = extract_json(body)?;
    let addr = state.powergate.new_addr(caller.0, req).await?;
    Ok(Json(NewAddrResponse { addr }))
}

/// POST /v1/wallet/send
async fn send_fil(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<SendFilRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let req = extract_json(body)?;
    state
        .powergate
        .send_fil(caller.0, &req.from, &req.to, req.amount)
        .await?;
    Ok(NO_CONTENT)
}

/// POST /v1/wallet/sign
async fn sign(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<SignRequest>, JsonRejection>,
) -> Result<Json<SignResponse>, AppError> {
    let req = extract_json(body)?;
    let message = decode_hex("message", &req.message)?;
    let signature = state.powergate.sign(caller.0, &req.addr, &message).await?;
    Ok(Json(SignResponse {
        signature: hex::encode(signature),
    }))
}

/// POST /v1/wallet/verify
async fn verify(
    State(state): State<AppState>,
    _caller: Caller,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, AppError> {
    let req = extract_json(body)?;
    let message = decode_hex("message", &req.message)?;
    let signature = decode_hex("signature", &req.signature)?;
    let valid = state
        .powergate
        .verify(&req.addr, &message, &signature)
        .await?;
    Ok(Json(VerifyResponse { valid }))
}
