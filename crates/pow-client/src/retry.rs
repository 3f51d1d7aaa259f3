//! # Request Retries
//!
//! Which failures a [`PowClient`](crate::PowClient) sends again, and how
//! long it waits in between.
//!
//! | Failure | Retried for |
//! |---|---|
//! | connection could not be opened | every method |
//! | request timed out | idempotent methods |
//! | `503` (`INFRASTRUCTURE`), `502`, `504` | idempotent methods |
//!
//! A `POST` that reached the server is never replayed, since it may have
//! enqueued a job or moved funds. Delays grow by the same [`Backoff`] the
//! pipeline uses.

use std::future::Future;
use std::time::Duration;

use reqwest::{Method, Response, StatusCode};

use crate::pipeline::Backoff;

/// Retry budget and delays for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn new(retries: u32, backoff: Backoff) -> Self {
        Self { retries, backoff }
    }

    /// Send every request exactly once.
    pub const fn never() -> Self {
        Self::new(0, Backoff::new(Duration::ZERO, Duration::ZERO))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Backoff::new(Duration::from_millis(200), Duration::from_secs(2)),
        )
    }
}

fn idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

fn transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Whether an attempt that ended in `outcome` may be sent again.
fn retriable(method: &Method, outcome: &Result<Response, reqwest::Error>) -> bool {
    match outcome {
        Ok(resp) => idempotent(method) && transient(resp.status()),
        Err(e) if e.is_connect() => true,
        Err(e) => e.is_timeout() && idempotent(method),
    }
}

/// Run `send` until it gives a final answer or `policy` runs out.
///
/// The last attempt's outcome is returned as-is, so a `503` that outlives
/// the budget reaches the caller as an API error.
pub(crate) async fn retry_send<F, Fut>(
    policy: &RetryPolicy,
    method: &Method,
    endpoint: &str,
    send: F,
) -> Result<Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut delay = policy.backoff.initial;
    let mut attempt = 0;
    loop {
        let outcome = send().await;
        if attempt >= policy.retries || !retriable(method, &outcome) {
            return outcome;
        }
        attempt += 1;
        match &outcome {
            Ok(resp) => tracing::warn!(
                endpoint,
                attempt,
                status = %resp.status(),
                ?delay,
                "powergate unavailable, retrying"
            ),
            Err(e) => tracing::warn!(
                endpoint,
                attempt,
                error = %e,
                ?delay,
                "powergate request failed, retrying"
            ),
        }
        tokio::time::sleep(delay).await;
        delay = policy.backoff.next(delay);
    }
}
