//! Bounded retry with a fixed delay between attempts.
//!
//! Long-running cloud transitions (power state changes, cloud-init applying
//! a fresh key) are awaited by polling. [`retry`] runs an operation until an
//! acceptance predicate holds or the attempt budget is spent, sleeping for
//! the configured interval between attempts but never after the last one.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Attempt budget used when nothing more specific is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Delay between attempts used when nothing more specific is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// How many times an operation runs and how long to wait in between.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

/// Raised when a [`RetryPolicy`] would never run or never wait.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum RetryPolicyError {
    /// The attempt budget was zero.
    #[error("retry policy requires at least one attempt")]
    ZeroAttempts,
    /// The delay between attempts was zero.
    #[error("retry policy requires a positive interval")]
    ZeroInterval,
}

impl RetryPolicy {
    /// Builds a policy after checking both bounds are positive.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] when either bound is zero.
    pub const fn new(max_attempts: u32, interval: Duration) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if interval.is_zero() {
            return Err(RetryPolicyError::ZeroInterval);
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    /// Maximum number of times the operation runs.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between consecutive attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Outcome of a retry loop that did not produce an accepted value.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every attempt completed but none was accepted.
    #[error("{what} did not succeed after {attempts} attempts")]
    Exhausted {
        /// Label of the awaited condition.
        what: String,
        /// Number of attempts that ran.
        attempts: u32,
    },
    /// The operation itself failed; the loop stops immediately.
    #[error(transparent)]
    Operation(E),
}

/// Runs `operation` until `accept` returns true for its value.
///
/// Operation errors abort the loop at once. When every attempt yields a
/// rejected value the loop reports [`RetryError::Exhausted`] after exactly
/// `max_attempts` runs and `max_attempts - 1` sleeps.
///
/// # Errors
///
/// Returns [`RetryError::Operation`] when the operation fails and
/// [`RetryError::Exhausted`] when the attempt budget is spent.
pub async fn retry<T, E, Op, Fut, Accept>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: Op,
    accept: Accept,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Accept: Fn(&T) -> bool,
{
    let total = policy.max_attempts();
    for attempt in 1..=total {
        let value = operation().await.map_err(RetryError::Operation)?;
        if accept(&value) {
            debug!(what, attempt, total, "condition met");
            return Ok(value);
        }

        info!(what, "attempt {attempt}/{total} not yet successful");
        if attempt < total {
            sleep(policy.interval()).await;
        }
    }

    warn!(what, attempts = total, "giving up");
    Err(RetryError::Exhausted {
        what: what.to_owned(),
        attempts: total,
    })
}
