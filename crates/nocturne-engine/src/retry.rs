// ABOUTME: Pluggable retry delay strategies and the shared retry executor
// ABOUTME: Capped exponential backoff with deterministic (seeded) or random jitter
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! Retry policy shared by every outbound call of a connector.
//!
//! One [`RetryDelayStrategy`] instance is handed to both the token manager and the
//! adapter's HTTP helpers, so a provider only ever sees a single, coordinated retry
//! cadence from a connector.

use nocturne_core::constants::{env_config, retry};
use nocturne_core::errors::ConnectorError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::env;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay as a function of the (1-based) attempt number
pub trait RetryDelayStrategy: Send + Sync + fmt::Debug {
    /// Delay to wait after failed attempt number `attempt`
    fn delay(&self, attempt: u32) -> Duration;

    /// Upper bound of any delay this strategy returns
    fn max_delay(&self) -> Duration;
}

/// Jitter applied on top of the exponential curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Exact delays
    None,
    /// Reproducible jitter: the same seed and attempt always yield the same delay
    Seeded {
        /// Maximum relative deviation (0.1 = +/-10%)
        factor: f64,
        /// Stream seed
        seed: u64,
    },
    /// Thread-local random jitter for production
    Random {
        /// Maximum relative deviation
        factor: f64,
    },
}

/// Capped exponential backoff: `base * multiplier^(attempt-1)`, never above `max`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
    jitter: Jitter,
}

impl ExponentialBackoff {
    /// Backoff without jitter
    #[must_use]
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier: multiplier.max(1.0),
            max: max.max(base),
            jitter: Jitter::None,
        }
    }

    /// Apply jitter
    #[must_use]
    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base delay
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    fn raw_delay_secs(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt.max(1) - 1).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        scaled.min(self.max.as_secs_f64())
    }

    fn jitter_offset(&self, attempt: u32) -> f64 {
        match self.jitter {
            Jitter::None => 0.0,
            Jitter::Seeded { factor, seed } => {
                let factor = factor.abs();
                if factor == 0.0 {
                    return 0.0;
                }
                let mut rng = ChaCha8Rng::seed_from_u64(seed ^ u64::from(attempt));
                rng.gen_range(-factor..=factor)
            }
            Jitter::Random { factor } => {
                let factor = factor.abs();
                if factor == 0.0 {
                    return 0.0;
                }
                rand::thread_rng().gen_range(-factor..=factor)
            }
        }
    }
}

impl RetryDelayStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay_secs(attempt);
        let jittered = raw * (1.0 + self.jitter_offset(attempt));
        Duration::from_secs_f64(jittered.clamp(0.0, self.max.as_secs_f64()))
    }

    fn max_delay(&self) -> Duration {
        self.max
    }
}

/// Same delay for every attempt
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl RetryDelayStrategy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }

    fn max_delay(&self) -> Duration {
        self.0
    }
}

/// Environment-driven backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryBackoffConfig {
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor
    pub multiplier: f64,
    /// Relative jitter (0.0 disables jitter)
    pub jitter_factor: f64,
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: retry::DEFAULT_BASE_DELAY_MS,
            max_delay_ms: retry::DEFAULT_MAX_DELAY_MS,
            multiplier: retry::DEFAULT_MULTIPLIER,
            jitter_factor: retry::DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryBackoffConfig {
    /// Read overrides from `NOCTURNE_RETRY_*`, falling back to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_delay_ms: parse_env(env_config::RETRY_BASE_DELAY_MS)
                .unwrap_or(defaults.base_delay_ms),
            max_delay_ms: parse_env(env_config::RETRY_MAX_DELAY_MS)
                .unwrap_or(defaults.max_delay_ms),
            multiplier: parse_env(env_config::RETRY_MULTIPLIER).unwrap_or(defaults.multiplier),
            jitter_factor: parse_env::<f64>(env_config::RETRY_JITTER_FACTOR)
                .map_or(defaults.jitter_factor, |f| f.clamp(0.0, 1.0)),
        }
    }

    /// Build the production strategy (random jitter)
    #[must_use]
    pub fn build(&self) -> Arc<dyn RetryDelayStrategy> {
        Arc::new(self.exponential().with_jitter(Jitter::Random {
            factor: self.jitter_factor,
        }))
    }

    /// Build a reproducible strategy for tests and replay
    #[must_use]
    pub fn build_seeded(&self, seed: u64) -> Arc<dyn RetryDelayStrategy> {
        Arc::new(self.exponential().with_jitter(Jitter::Seeded {
            factor: self.jitter_factor,
            seed,
        }))
    }

    fn exponential(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Run `operation` until it succeeds, fails terminally, or exhausts `max_retries`
///
/// The operation receives the 1-based attempt number. Retryable failures consume one
/// retry and wait `strategy.delay(attempt)` (or the provider's `Retry-After` hint when
/// longer, capped at the strategy maximum). Non-retryable failures are returned at once.
///
/// # Errors
///
/// - the operation's own error when it is not retryable
/// - `ConnectorError::RetriesExhausted` once `max_retries` retries have failed
/// - `ConnectorError::Cancelled` when `cancel` fires during an attempt or a wait
pub async fn execute_with_retry<F, Fut, T>(
    mut operation: F,
    strategy: &dyn RetryDelayStrategy,
    max_retries: u32,
    operation_name: &str,
    cancel: &CancellationToken,
) -> Result<T, ConnectorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let total_attempts = max_retries.saturating_add(1);
    let mut attempt = 1;

    loop {
        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(ConnectorError::Cancelled),
            result = operation(attempt) => result,
        };

        let error = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            debug!(
                operation = operation_name,
                attempt,
                error = %error,
                "non-retryable failure, aborting"
            );
            return Err(error);
        }

        if attempt >= total_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt,
                error = %error,
                "retries exhausted"
            );
            return Err(ConnectorError::RetriesExhausted {
                operation: operation_name.to_owned(),
                attempts: attempt,
                last_error: Box::new(error),
            });
        }

        let mut delay = strategy.delay(attempt);
        if let Some(hint) = error.retry_after_secs() {
            delay = delay.max(Duration::from_secs(hint)).min(strategy.max_delay());
        }

        warn!(
            operation = operation_name,
            attempt,
            max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "retryable failure, backing off"
        );

        tokio::select! {
            () = cancel.cancelled() => return Err(ConnectorError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(10))
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let strategy = backoff();
        assert_eq!(strategy.delay(1), Duration::from_secs(1));
        assert_eq!(strategy.delay(2), Duration::from_secs(2));
        assert_eq!(strategy.delay(3), Duration::from_secs(4));
        assert_eq!(strategy.delay(4), Duration::from_secs(8));
        assert_eq!(strategy.delay(5), Duration::from_secs(10));
        assert_eq!(strategy.delay(60), Duration::from_secs(10));
    }

    #[test]
    fn test_attempt_zero_behaves_like_first_attempt() {
        assert_eq!(backoff().delay(0), backoff().delay(1));
    }

    #[test]
    fn test_seeded_jitter_is_reproducible_and_bounded() {
        let jitter = Jitter::Seeded {
            factor: 0.5,
            seed: 42,
        };
        let a = backoff().with_jitter(jitter);
        let b = backoff().with_jitter(jitter);
        for attempt in 1..=8 {
            let delay = a.delay(attempt);
            assert_eq!(delay, b.delay(attempt));
            assert!(delay <= Duration::from_secs(10));
        }
        let first = a.delay(1).as_secs_f64();
        assert!((0.5..=1.5).contains(&first));
    }

    #[test]
    fn test_max_is_never_below_base() {
        let strategy =
            ExponentialBackoff::new(Duration::from_secs(5), 2.0, Duration::from_secs(1));
        assert_eq!(strategy.delay(1), Duration::from_secs(5));
        assert_eq!(strategy.max_delay(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_consume_budget() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let result: Result<(), ConnectorError> = execute_with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::from_status(503, "unavailable")) }
            },
            &backoff(),
            3,
            "fetch",
            &cancel,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(
            result,
            Err(ConnectorError::RetriesExhausted { attempts: 4, .. })
        ));
        // 1s + 2s + 4s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_aborts_without_sleeping() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let result: Result<(), ConnectorError> = execute_with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ConnectorError::from_status(401, "bad credentials")) }
            },
            &backoff(),
            5,
            "login",
            &cancel,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ConnectorError::AuthRejected { .. })));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let cancel = CancellationToken::new();
        let result = execute_with_retry(
            |attempt| async move {
                if attempt < 3 {
                    Err(ConnectorError::Network("reset".into()))
                } else {
                    Ok(attempt)
                }
            },
            &backoff(),
            3,
            "fetch",
            &cancel,
        )
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_honoured_up_to_cap() {
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let result = execute_with_retry(
            |attempt| async move {
                if attempt == 1 {
                    Err(ConnectorError::RateLimited {
                        retry_after_secs: Some(60),
                    })
                } else {
                    Ok(())
                }
            },
            &backoff(),
            1,
            "fetch",
            &cancel,
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let result: Result<(), ConnectorError> = execute_with_retry(
            |_| async { Err(ConnectorError::Network("down".into())) },
            &FixedDelay(Duration::from_secs(3_600)),
            10,
            "fetch",
            &cancel,
        )
        .await;
        assert_eq!(result, Err(ConnectorError::Cancelled));
    }
}
