//! Fixed-delay retry of whole operations.
//!
//! Attempt counts are small (three in practice) so the delay stays constant between
//! attempts. Intermediate failures are returned to the caller in [`Retried::failures`].

use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Single-part uploads: 3 attempts, 2 s apart.
    pub const fn upload() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    /// Post-upload existence checks: 3 attempts, 3 s apart.
    pub const fn verification() -> Self {
        Self::new(3, Duration::from_secs(3))
    }

    /// No sleeping between attempts.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::upload()
    }
}

/// One failed attempt that was followed by another attempt.
#[derive(Debug)]
pub struct FailedAttempt {
    pub attempt: u32,
    pub error: Error,
}

/// Outcome of [`retry`] together with the failures seen on the way.
#[derive(Debug)]
pub struct Retried<T> {
    pub outcome: Result<T>,
    pub failures: Vec<FailedAttempt>,
}

impl<T> Retried<T> {
    /// Number of times the operation ran.
    pub fn attempts(&self) -> u32 {
        self.failures.len() as u32 + 1
    }

    pub fn into_result(self) -> Result<T> {
        self.outcome
    }
}

/// Runs `operation` until it succeeds or `policy.max_attempts` runs are used up.
///
/// The operation receives the 1-based attempt number. The last error is returned as the
/// outcome; earlier ones land in `failures`.
pub fn retry<T, F>(policy: &RetryPolicy, operation: F) -> Retried<T>
where
    F: FnMut(u32) -> Result<T>,
{
    retry_if(policy, |_| true, operation)
}

/// Like [`retry`], but stops at the first error `should_retry` rejects.
///
/// A rate-limit `Retry-After` longer than the policy delay replaces the delay.
pub fn retry_if<T, P, F>(policy: &RetryPolicy, should_retry: P, mut operation: F) -> Retried<T>
where
    P: Fn(&Error) -> bool,
    F: FnMut(u32) -> Result<T>,
{
    let max_attempts = policy.attempts();
    let mut failures = Vec::new();

    for attempt in 1..=max_attempts {
        match operation(attempt) {
            Ok(value) => {
                return Retried {
                    outcome: Ok(value),
                    failures,
                };
            }
            Err(error) if attempt < max_attempts && should_retry(&error) => {
                tracing::warn!(attempt, max_attempts, error = %error, "attempt failed, retrying");
                #[cfg(feature = "metrics")]
                metrics::counter!("depot_retries_total").increment(1);
                let delay = error
                    .retry_after()
                    .map_or(policy.delay, |after| after.max(policy.delay));
                failures.push(FailedAttempt { attempt, error });
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(error) => {
                return Retried {
                    outcome: Err(error),
                    failures,
                };
            }
        }
    }

    // max_attempts is at least 1, so the loop always returns.
    Retried {
        outcome: Err(Error::invalid_config("retry policy allowed no attempts")),
        failures,
    }
}
