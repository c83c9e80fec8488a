// ── Retry with exponential backoff ──
//
// Wraps vendor operations that can fail on endpoint flakiness. Transient
// failures are retried with capped exponential backoff; authentication and
// other non-transient failures surface immediately.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::handle::VacuumHandle;

// ── RetryPolicy ──────────────────────────────────────────────────

/// Exponential backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the second attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on any single delay. Default: 30s.
    pub max_delay: Duration,

    /// Total attempts, including the first. Default: 5.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `retry`-th failed attempt (zero-based):
    /// `min(initial_delay * 2^retry, max_delay)`. Never decreases.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

// ── RetryableConnector ───────────────────────────────────────────

/// Runs vendor operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryableConnector {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryableConnector {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort backoff sleeps when `cancel` fires.
    pub fn with_cancel(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails non-transiently, or the policy's
    /// attempts are spent.
    ///
    /// Authentication failures are never retried. Exhausting the attempts
    /// yields [`CoreError::RetriesExhausted`]; cancellation during a
    /// backoff sleep yields [`CoreError::Cancelled`].
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, vacbridge_api::Error>>,
    {
        let attempts = self.policy.attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if err.is_auth() {
                warn!(operation, error = %err, "credentials rejected, not retrying");
                return Err(err.into());
            }
            if !err.is_transient() {
                debug!(operation, attempt, error = %err, "non-transient failure, not retrying");
                return Err(err.into());
            }

            if attempt >= attempts {
                warn!(operation, attempts, error = %err, "retry limit reached, giving up");
                return Err(CoreError::RetriesExhausted {
                    operation: operation.to_owned(),
                    attempts,
                    last_error: err.to_string(),
                });
            }

            let delay = self.policy.backoff(attempt - 1);
            warn!(
                operation,
                attempt,
                error = %err,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "transient failure, backing off"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(CoreError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Bring a handle to readiness, retrying transient handshake failures.
    pub async fn ensure_ready(&self, handle: &VacuumHandle) -> Result<(), CoreError> {
        self.retry("vacuum handshake", || handle.connect_and_wait_until_ready())
            .await
    }
}
