//! Retry with linear backoff for provider calls.
//!
//! Not used on the enhancement path, where a failing framework is recorded and
//! skipped instead. Embedders that want retries wrap their own calls.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Runs `op` up to `max_retries` times (at least once).
///
/// Attempt `n` failing waits `base_delay * n` before the next one. A 401 is
/// returned immediately. Otherwise the last error is returned once every
/// attempt has failed.
pub async fn retry_call<T, F, Fut>(
    mut op: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = max_retries.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.status() == Some(401) => return Err(e),
            Err(e) if attempt >= attempts => {
                warn!("Giving up after {} attempts: {}", attempts, e);
                return Err(e);
            }
            Err(e) => {
                let delay = base_delay * attempt;
                debug!("Attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Rate limits, server errors and transport failures are worth another try.
pub fn is_retryable(error: &ProviderError) -> bool {
    match error {
        ProviderError::Transport { .. } => true,
        ProviderError::Api { status, .. } | ProviderError::InvalidResponse { status, .. } => {
            *status == 429 || *status >= 500
        }
        ProviderError::InvalidModel { .. } => false,
    }
}
