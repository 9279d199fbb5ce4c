//! Shared stage utilities.
//!
//! Timeout and bounded-retry wrapper used by the read-only stage calls
//! (classification, embedding, store search). The streaming generation
//! call is never routed through here — it must not be retried once tokens
//! have begun flowing.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Errors eligible for the single bounded retry.
pub(crate) trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::ports::inference::InferenceError {
    fn is_retryable(&self) -> bool {
        self.is_retryable()
    }
}

impl Retryable for crate::ports::knowledge_store::StoreError {
    fn is_retryable(&self) -> bool {
        self.is_retryable()
    }
}

/// Run an idempotent read-only call under `deadline`, retrying exactly
/// once on timeout or a retryable transport error.
///
/// Returns the failure as a string for the caller to wrap into its stage
/// error. A non-retryable error is returned immediately.
pub(crate) async fn call_with_timeout_retry<T, E, Fut, F>(
    label: &str,
    deadline: Duration,
    mut call: F,
) -> Result<T, String>
where
    E: Retryable + std::fmt::Display,
    Fut: Future<Output = Result<T, E>>,
    F: FnMut() -> Fut,
{
    match tokio::time::timeout(deadline, call()).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => {
            if !e.is_retryable() {
                return Err(e.to_string());
            }
            debug!("{label}: retrying once after error: {e}");
        }
        Err(_) => {
            debug!("{label}: retrying once after timeout");
        }
    }

    match tokio::time::timeout(deadline, call()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("{label} timed out")),
    }
}
