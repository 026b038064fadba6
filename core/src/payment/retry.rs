//! Bounded retry with exponential backoff for payment provider calls.
//!
//! Every attempt is cut off after the policy's timeout, and an attempt is only repeated when
//! the provider error is transient. Callers pass the same idempotency key on every attempt, so
//! a repeated charge is deduplicated by the provider.
//!
//! ```rust
//! use matchpoint_core::payment::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(200))
//!     .max_delay(Duration::from_secs(2))
//!     .multiplier(2.0)
//!     .attempt_timeout(Duration::from_secs(10))
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(400));
//! ```

use super::provider::ProviderError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

/// Retry policy for provider calls.
///
/// # Default Values
///
/// - `max_retries`: 2
/// - `initial_delay`: 200ms
/// - `max_delay`: 2 seconds
/// - `multiplier`: 2.0
/// - `attempt_timeout`: 10 seconds
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for exponential backoff
    pub max_delay: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Upper bound on a single provider call
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            attempt_timeout: None,
        }
    }

    /// A policy that never retries, with the given per-call timeout.
    #[must_use]
    pub fn no_retry(attempt_timeout: Duration) -> Self {
        Self::builder()
            .max_retries(0)
            .attempt_timeout(attempt_timeout)
            .build()
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    attempt_timeout: Option<Duration>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(2),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(200)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(2)),
            multiplier: self.multiplier.unwrap_or(2.0),
            attempt_timeout: self.attempt_timeout.unwrap_or(Duration::from_secs(10)),
        }
    }
}

/// Runs a provider call under `policy`.
///
/// A call that exceeds the attempt timeout counts as [`ProviderError::Timeout`]. Only errors
/// for which [`ProviderError::is_retryable`] holds are retried.
///
/// # Errors
///
/// The last provider error once retries are exhausted, or the first non-retryable one.
pub async fn call_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;

    loop {
        let started = Instant::now();
        let outcome = match timeout(policy.attempt_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };
        metrics::histogram!("matchpoint_provider_call_duration_seconds", "operation" => operation)
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation, attempt, "Provider call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() || attempt >= policy.max_retries => {
                metrics::counter!("matchpoint_provider_errors_total", "operation" => operation)
                    .increment(1);
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Provider call failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
