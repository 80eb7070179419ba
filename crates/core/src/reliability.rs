//! Timeout, retry and cancellation around calls to external capabilities.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.backoff_base.checked_mul(factor).unwrap_or(self.backoff_max).min(self.backoff_max)
    }
}

/// Runs `call` until it succeeds, fails with a non-retryable error, or the
/// attempts are used up. Every attempt is bounded by `call_timeout`; a
/// timeout counts as a provider failure. Cancelling `cancel` aborts the
/// in-flight attempt or backoff sleep immediately.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    capability: &str,
    mut call: F,
) -> Result<T, ApplicationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApplicationError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(cancelled(capability));
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(capability)),
            result = tokio::time::timeout(policy.call_timeout, call(attempt)) => result,
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) if !error.is_retryable() => return Err(error),
            Ok(Err(error)) => error,
            Err(_) => ApplicationError::provider(
                capability,
                format!("timed out after {}ms", policy.call_timeout.as_millis()),
            ),
        };

        tracing::warn!(
            event_name = "capability.call.failed",
            capability,
            attempt = attempt + 1,
            max_attempts = attempts,
            error_kind = error.kind().as_str(),
            error = %error,
            "external capability call failed"
        );
        last_error = Some(error);

        if attempt + 1 < attempts {
            let delay = policy.backoff_delay(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(capability)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(match last_error {
        Some(ApplicationError::Provider { capability, message }) => ApplicationError::Provider {
            message: format!("{message} (gave up after {attempts} attempts)"),
            capability,
        },
        Some(other) => other,
        None => ApplicationError::provider(capability, "no attempt was made"),
    })
}

fn cancelled(capability: &str) -> ApplicationError {
    ApplicationError::Cancelled(format!("{capability} call aborted by cancellation"))
}
