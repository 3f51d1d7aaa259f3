//! # Authentication Middleware
//!
//! Two credentials guard the API:
//!
//! - A per-profile token in `x-ffs-token` on every user route. The
//!   middleware resolves it to the owning profile and injects a [`Caller`]
//!   into the request extensions. The IPFS-add proxy reads the same token
//!   from `x-ipfs-ffs-auth`.
//! - A single admin token in `x-ffs-admin-token` on `/v1/admin/*`, compared
//!   in constant time. When no admin token is configured the admin routes
//!   are open.
//!
//! A missing credential is `UNAUTHENTICATED` (401), a wrong one
//! `PERMISSION_DENIED` (403).

use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use pow_core::ProfileId;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying a profile's auth token.
pub const USER_TOKEN_HEADER: &str = "x-ffs-token";
/// Header carrying the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "x-ffs-admin-token";
/// Header carrying a profile's auth token on the IPFS-add proxy.
pub const IPFS_AUTH_HEADER: &str = "x-ipfs-ffs-auth";

// ── Caller ──────────────────────────────────────────────────────────────────

/// The profile an authenticated request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub ProfileId);

/// Extracts the caller the auth middleware injected into extensions.
/// Returns 401 if the middleware did not run.
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .copied()
            .ok_or_else(|| AppError::Unauthenticated("no caller in request context".into()))
    }
}

// ── Profile tokens ──────────────────────────────────────────────────────────

fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn authenticate(state: &AppState, mut request: Request, next: Next, header: &str) -> Response {
    let token = header_value(&request, header);
    match state.powergate.authenticate(token) {
        Ok(profile) => {
            request.extensions_mut().insert(Caller(profile));
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(header, reason = %err.message, "authentication failed");
            AppError::from(err).into_response()
        }
    }
}

/// Resolve `x-ffs-token` to a [`Caller`].
pub async fn user_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    authenticate(&state, request, next, USER_TOKEN_HEADER).await
}

/// Resolve `x-ipfs-ffs-auth` to a [`Caller`].
pub async fn ipfs_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    authenticate(&state, request, next, IPFS_AUTH_HEADER).await
}

// ── Admin token ─────────────────────────────────────────────────────────────

/// Admin auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the token value.
#[derive(Clone)]
pub struct AdminAuth {
    pub token: Option<String>,
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Constant-time token comparison. Unequal lengths still perform a
/// comparison so timing does not reveal the expected length.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Check `x-ffs-admin-token` against the configured admin token.
pub async fn admin_auth(request: Request, next: Next) -> Response {
    let expected = request
        .extensions()
        .get::<AdminAuth>()
        .and_then(|a| a.token.clone());
    let Some(expected) = expected else {
        return next.run(request).await;
    };
    let verdict = match header_value(&request, ADMIN_TOKEN_HEADER) {
        Some(provided) if constant_time_token_eq(provided, &expected) => Ok(()),
        Some(_) => Err(AppError::PermissionDenied("invalid admin token".into())),
        None => Err(AppError::Unauthenticated("missing admin token".into())),
    };
    match verdict {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(reason = %err, "admin authentication failed");
            err.into_response()
        }
    }
}
