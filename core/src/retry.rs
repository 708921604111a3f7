//! Retry logic with exponential backoff.
//!
//! Used to re-run an optimistic unit of work after a version conflict. Every
//! attempt starts over from a fresh read, so a retry can never act on stale
//! counts.
//!
//! # Example
//!
//! ```rust
//! use circulation_core::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(1))
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("conflict"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 8
/// - `initial_delay`: 1ms
/// - `max_delay`: 50ms
/// - `multiplier`: 2.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: usize,
    /// Delay before the first retry
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    /// Cap for the exponential backoff
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Start from the defaults and override what you need.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder(Self::default())
    }

    /// Backoff before retry number `attempt + 1`.
    ///
    /// Grows by `multiplier` per attempt and never exceeds `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if scaled_ms.is_finite() && scaled_ms < self.max_delay.as_millis() as f64 {
            Duration::from_millis(scaled_ms as u64)
        } else {
            self.max_delay
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder(RetryPolicy);

impl RetryPolicyBuilder {
    /// Retries allowed after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.0.max_retries = max_retries;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.0.initial_delay = delay;
        self
    }

    /// Upper bound on any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.0.max_delay = delay;
        self
    }

    /// Growth factor between consecutive delays.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.0.multiplier = multiplier;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.0
    }
}

/// Retry an async operation while its error is retryable.
///
/// Errors for which `is_retryable` returns `false` are returned immediately.
/// Once `max_retries` retries are used up the last error is returned.
///
/// # Errors
///
/// Returns the operation's error when it is not retryable or when all retries
/// are exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(retries = attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(error) if !is_retryable(&error) => return Err(error),
            Err(error) => error,
        };

        if attempt >= policy.max_retries {
            tracing::warn!(retries = attempt, %error, "Giving up, retries exhausted");
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis(), %error, "Retrying");
        sleep(delay).await;
        attempt += 1;
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(5))
            .max_delay(Duration::from_millis(30))
            .build();

        let delays: Vec<_> = (0..5).map(|a| policy.delay_for_attempt(a).as_millis()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30]);
        assert_eq!(policy.delay_for_attempt(usize::MAX), Duration::from_millis(30));
    }

    #[test]
    fn first_try_success_does_not_sleep() {
        let result = tokio_test::block_on(retry_with_predicate(
            &fast(0),
            || async { Ok::<_, String>(7) },
            |_: &String| true,
        ));
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn conflicts_are_retried_until_success() {
        let calls = &AtomicUsize::new(0);
        let result = retry_with_predicate(
            &fast(3),
            move || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err("version conflict"),
                    _ => Ok("committed"),
                }
            },
            |e: &&str| e.contains("conflict"),
        )
        .await;

        assert_eq!(result, Ok("committed"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = &AtomicUsize::new(0);
        let result = retry_with_predicate(
            &fast(2),
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("version conflict")
            },
            |_: &&str| true,
        )
        .await;

        assert_eq!(result, Err("version conflict"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let calls = &AtomicUsize::new(0);
        let result = retry_with_predicate(
            &fast(5),
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("no copies available")
            },
            |e: &&str| e.contains("conflict"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_serializes_delays_as_millis() {
        let json = serde_json::to_value(RetryPolicy::default()).unwrap_or_default();
        assert_eq!(json["initial_delay"], 1);
        assert_eq!(json["max_delay"], 50);
    }
}
