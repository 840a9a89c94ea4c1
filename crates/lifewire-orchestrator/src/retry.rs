//! Bounded exponential backoff for transient failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use lifewire_filter::AccessError;
use lifewire_store::{GrantError, StoreError};

/// Classifies an error as worth retrying.
pub trait Retryable {
    /// Returns `true` if the failed operation may succeed when repeated.
    fn is_transient(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

impl Retryable for GrantError {
    fn is_transient(&self) -> bool {
        GrantError::is_transient(self)
    }
}

impl Retryable for AccessError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

/// Retry policy with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Never less than 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is raised to at least 1.
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            multiplier: multiplier.max(1.0),
        }
    }

    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Delay to wait after `failed_attempts` failures.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failed_attempts - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let scaled = self.initial_backoff.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        self.initial_backoff.mul_f64(factor)
    }

    /// Returns `true` if another attempt is allowed after `attempts_made`.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(5), 2.0)
    }
}

/// Why [`with_retry`] gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E: Display> {
    /// The error was not transient; no further attempts were made.
    #[error("{0}")]
    Permanent(E),

    /// Every allowed attempt failed transiently.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The last error observed.
        last: E,
    },
}

impl<E: Display> RetryError<E> {
    /// The underlying error, whichever way the retry ended.
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(e) | Self::Exhausted { last: e, .. } => e,
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or the policy runs out.
///
/// # Errors
///
/// [`RetryError::Permanent`] on the first non-transient error,
/// [`RetryError::Exhausted`] once `policy.max_attempts` transient failures
/// have been seen.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(RetryError::Permanent(e)),
            Err(e) if !policy.should_retry(attempts) => {
                tracing::warn!(operation, attempts, error = %e, "retries exhausted");
                return Err(RetryError::Exhausted { attempts, last: e });
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempts);
                tracing::debug!(
                    operation,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Flaky {
        Busy,
        Broken,
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for Flaky {
        fn is_transient(&self) -> bool {
            *self == Flaky::Busy
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(2),
            2.0,
        )
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(350),
            2.0,
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_millis(350));
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, 2.0).max_attempts, 1);
        assert!(!RetryPolicy::none().should_retry(1));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(5), "flaky_op", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Flaky::Busy)
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_stop_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast(5), "flaky_op", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky::Broken)
        })
        .await;
        assert_eq!(result, Err(RetryError::Permanent(Flaky::Broken)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast(3), "flaky_op", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky::Busy)
        })
        .await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: Flaky::Busy
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
