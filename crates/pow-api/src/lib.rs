//! # pow-api — Powergate HTTP/JSON RPC
//!
//! JSON over HTTP. User routes live under `/v1`, admin routes under
//! `/v1/admin`, and streams are newline-delimited JSON
//! (`application/x-ndjson`).
//!
//! ## API Surface
//!
//! | Prefix | Auth | Module |
//! |---|---|---|
//! | `/v1/data/*`, `/v1/storage-*/*`, `/v1/deals/*`, `/v1/wallet/*` | `x-ffs-token` | [`routes`] |
//! | `/v1/admin/*` | `x-ffs-admin-token` | [`routes::admin`] |
//! | `/ipfs/add` | `x-ipfs-ffs-auth` | [`routes::ipfs`] |
//! | `/health/*`, `/metrics` | none | this module |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → metrics_middleware → auth → Handler
//! ```
//!
//! ## Errors
//!
//! Every failure is an [`error::AppError`] rendered as
//! `{"error":{"code","message"}}` with the status the error kind maps to.

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod stream;

use axum::extract::{DefaultBodyLimit, State};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AdminAuth;
use crate::error::AppError;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes and `/metrics` are mounted outside the auth middleware
/// so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let admin_auth = AdminAuth {
        token: state.config.admin_token.clone(),
    };
    if admin_auth.token.is_none() {
        tracing::warn!("no admin token configured; admin routes are open");
    }
    let body_limit = DefaultBodyLimit::max(state.config.max_stage_bytes);

    let user = Router::new()
        .merge(routes::data::router())
        .merge(routes::storage_config::router())
        .merge(routes::jobs::router())
        .merge(routes::info::router())
        .merge(routes::deals::router())
        .merge(routes::wallet::router())
        .layer(from_fn_with_state(state.clone(), auth::user_auth));

    let ipfs = routes::ipfs::router().layer(from_fn_with_state(state.clone(), auth::ipfs_auth));

    let admin = routes::admin::router()
        .layer(from_fn(auth::admin_auth))
        .layer(axum::Extension(admin_auth));

    let api = Router::new()
        .merge(user)
        .merge(ipfs)
        .merge(admin)
        .layer(body_limit)
        .layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http());

    // Unauthenticated probes.
    let open = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(render_metrics));

    Router::new().merge(open).merge(api).with_state(state)
}

/// Liveness probe: 200 while the process runs.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe.
async fn readiness() -> &'static str {
    "ready"
}

/// Prometheus text exposition, when the recorder is installed.
async fn render_metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .ok_or_else(|| AppError::NotFound("metrics are disabled".into()))
}
