//! Retry with exponential backoff for capability calls.
//!
//! Only [`CapabilityError::Infrastructure`] is retried. Any other error is
//! returned at once.

use std::future::Future;
use std::time::Duration;

use crate::error::CapabilityError;

/// Call `f` up to `retries + 1` times, sleeping `base`, `2 * base`, ...
/// between attempts that fail with an infrastructure error.
pub(crate) async fn retry_infra<T, F, Fut>(
    what: &str,
    retries: u32,
    base: Duration,
    f: F,
) -> Result<T, CapabilityError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    for attempt in 0..retries {
        match f().await {
            Err(e) if e.is_retriable() => {
                let delay = base.saturating_mul(2u32.saturating_pow(attempt));
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = retries,
                    "{what} failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
    f().await
}
