//! Retry with exponential backoff.
//!
//! Wraps a fallible async operation, sleeping `min(2^n * base, cap)` between
//! attempts until it succeeds, the attempt budget runs out, or the owning
//! session is cancelled.

use std::time::Duration;

use realtime::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay after the first failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Default cap on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after attempt `attempt` (zero based) has failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Failure streak bookkeeping. Cleared by any success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub next_delay_ms: u64,
}

/// Runs operations under a [`RetryPolicy`], tracking the failure streak.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryController {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, state: RetryState::default() }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn state(&self) -> RetryState {
        self.state
    }

    /// Count a failure and return the delay before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.state.consecutive_failures);
        self.note_failure(delay);
        delay
    }

    fn note_failure(&mut self, delay: Duration) {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        self.state.next_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn record_success(&mut self) {
        if self.state.consecutive_failures > 0 {
            debug!(
                consecutive_failures = self.state.consecutive_failures,
                "recovered after failures"
            );
        }
        self.state = RetryState::default();
    }

    pub fn reset(&mut self) {
        self.state = RetryState::default();
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// The backoff curve restarts with every run; the failure streak in
    /// [`RetryState`] carries across runs until a success clears it.
    ///
    /// # Errors
    ///
    /// Returns `Error::RetriesExhausted` (carrying the last failure) once
    /// every attempt has failed, or `Error::Cancelled` if `cancel` fires
    /// first.
    pub async fn run<T, F, Fut>(&mut self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => err,
            };

            let delay = self.policy.delay_for(attempt);
            self.note_failure(delay);
            attempt += 1;

            if attempt >= max_attempts {
                warn!(
                    monotonic_counter.retries_exhausted = 1,
                    attempts = attempt,
                    error = %err,
                    "giving up after repeated failures"
                );
                return Err(Error::RetriesExhausted(format!(
                    "{attempt} attempts failed, last error: {err}"
                )));
            }

            warn!(
                monotonic_counter.fetch_failed = 1,
                attempt,
                transient = err.is_transient(),
                backoff_ms = self.state.next_delay_ms,
                error = %err,
                "attempt failed, backing off"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
