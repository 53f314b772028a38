// ABOUTME: Bearer token lifecycle manager with cached tokens and single-flight acquisition
// ABOUTME: Hides provider login flows behind get_token and shares one in-flight login per connector
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! # Token lifecycle
//!
//! [`AuthTokenManager::get_token`] returns the cached token while it has more than the
//! configured buffer of lifetime left. Otherwise it joins the acquisition already in
//! flight, or starts exactly one if none is running. The acquisition itself is a
//! [`Shared`] future stored next to the cache, so every concurrent caller awaits the
//! same login call and observes the same result.
//!
//! Acquisition failures never escape as panics: callers get
//! `ConnectorError::TokenUnavailable`, which the scheduler treats as an ordinary
//! failed cycle.

use crate::clock::{Clock, SystemClock};
use crate::retry::{execute_with_retry, RetryDelayStrategy};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use nocturne_core::errors::ConnectorError;
use nocturne_core::models::AuthToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Provider-specific login / refresh flow
#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    /// Perform one login attempt and return the new token
    ///
    /// # Errors
    ///
    /// Returns a classified `ConnectorError`; retryable errors are retried by the
    /// manager, non-retryable ones end the acquisition immediately.
    async fn acquire_token(&self) -> Result<AuthToken, ConnectorError>;
}

type SharedAcquisition = Shared<BoxFuture<'static, Result<AuthToken, ConnectorError>>>;

#[derive(Default)]
struct TokenSlot {
    cached: Option<AuthToken>,
    in_flight: Option<(u64, SharedAcquisition)>,
    next_generation: u64,
}

/// Produces a currently-valid bearer token for one connector
pub struct AuthTokenManager {
    connector_id: String,
    acquirer: Arc<dyn TokenAcquirer>,
    strategy: Arc<dyn RetryDelayStrategy>,
    max_retries: u32,
    buffer: chrono::Duration,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    slot: Arc<Mutex<TokenSlot>>,
    acquisitions: Arc<AtomicU64>,
}

impl AuthTokenManager {
    /// Create a manager
    ///
    /// `buffer` is the minimum remaining lifetime for a cached token to be reused
    /// (`TokenLifetimeBufferMinutes`).
    pub fn new(
        connector_id: impl Into<String>,
        acquirer: Arc<dyn TokenAcquirer>,
        strategy: Arc<dyn RetryDelayStrategy>,
        max_retries: u32,
        buffer: chrono::Duration,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            acquirer,
            strategy,
            max_retries,
            buffer,
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
            slot: Arc::new(Mutex::new(TokenSlot::default())),
            acquisitions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Use a custom clock for expiry checks
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Abort in-flight acquisitions when `shutdown` is cancelled
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Connector this manager serves
    #[must_use]
    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    /// Number of acquisitions started so far (not attempts)
    #[must_use]
    pub fn acquisition_count(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Return a token valid for the imminent call
    ///
    /// # Errors
    ///
    /// - `ConnectorError::TokenUnavailable` when acquisition failed or was exhausted
    /// - `ConnectorError::Cancelled` when `cancel` fires while waiting
    pub async fn get_token(&self, cancel: &CancellationToken) -> Result<AuthToken, ConnectorError> {
        let acquisition = {
            let mut slot = self.slot.lock().await;
            let now = self.clock.now();
            if let Some(token) = slot
                .cached
                .as_ref()
                .filter(|t| t.is_valid_for(now, self.buffer))
            {
                return Ok(token.clone());
            }
            if slot.cached.take().is_some() {
                debug!(connector = %self.connector_id, "cached token inside refresh buffer");
            }
            match &slot.in_flight {
                Some((_, shared)) => shared.clone(),
                None => self.start_acquisition(&mut slot),
            }
        };

        let result = tokio::select! {
            () = cancel.cancelled() => return Err(ConnectorError::Cancelled),
            result = acquisition => result,
        };

        result.map_err(|error| match error {
            ConnectorError::Cancelled => ConnectorError::Cancelled,
            other => ConnectorError::TokenUnavailable {
                reason: other.to_string(),
            },
        })
    }

    /// Drop the cached token, e.g. after the provider answered 401
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.cached.take().is_some() {
            info!(connector = %self.connector_id, "cached token invalidated");
        }
    }

    /// Currently cached token, without triggering acquisition
    pub async fn cached_token(&self) -> Option<AuthToken> {
        self.slot.lock().await.cached.clone()
    }

    fn start_acquisition(&self, slot: &mut TokenSlot) -> SharedAcquisition {
        let generation = slot.next_generation;
        slot.next_generation = slot.next_generation.wrapping_add(1);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let acquirer = Arc::clone(&self.acquirer);
        let strategy = Arc::clone(&self.strategy);
        let max_retries = self.max_retries;
        let shutdown = self.shutdown.clone();
        let slot_ref = Arc::clone(&self.slot);
        let clock = Arc::clone(&self.clock);
        let buffer = self.buffer;
        let operation = format!("{}:acquire_token", self.connector_id);
        let connector_id = self.connector_id.clone();

        info!(connector = %connector_id, generation, "starting token acquisition");

        let acquisition = async move {
            let result = execute_with_retry(
                |_| {
                    let acquirer = Arc::clone(&acquirer);
                    async move { acquirer.acquire_token().await }
                },
                strategy.as_ref(),
                max_retries,
                &operation,
                &shutdown,
            )
            .await;

            let mut slot = slot_ref.lock().await;
            if slot
                .in_flight
                .as_ref()
                .is_some_and(|(current, _)| *current == generation)
            {
                slot.in_flight = None;
            }
            match &result {
                Ok(token) => {
                    if !token.is_valid_for(clock.now(), buffer) {
                        warn!(
                            connector = %connector_id,
                            expires_at = %token.expires_at,
                            "provider issued a token shorter than the refresh buffer"
                        );
                    }
                    slot.cached = Some(token.clone());
                    info!(connector = %connector_id, expires_at = %token.expires_at, "token acquired");
                }
                Err(error) => {
                    warn!(connector = %connector_id, error = %error, "token acquisition failed");
                }
            }
            drop(slot);
            result
        }
        .boxed()
        .shared();

        slot.in_flight = Some((generation, acquisition.clone()));
        acquisition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::retry::FixedDelay;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::AtomicU32;

    struct CountingAcquirer {
        calls: AtomicU32,
        clock: Arc<ManualClock>,
        lifetime: Duration,
    }

    #[async_trait]
    impl TokenAcquirer for CountingAcquirer {
        async fn acquire_token(&self) -> Result<AuthToken, ConnectorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(AuthToken::expiring_in(
                format!("token-{n}"),
                self.clock.now(),
                self.lifetime,
            ))
        }
    }

    fn manager(acquirer: Arc<CountingAcquirer>, clock: Arc<ManualClock>) -> AuthTokenManager {
        AuthTokenManager::new(
            "test",
            acquirer,
            Arc::new(FixedDelay(std::time::Duration::from_millis(10))),
            2,
            Duration::minutes(5),
        )
        .with_clock(clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_when_inside_buffer() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let acquirer = Arc::new(CountingAcquirer {
            calls: AtomicU32::new(0),
            clock: Arc::clone(&clock),
            lifetime: Duration::minutes(30),
        });
        let tokens = manager(Arc::clone(&acquirer), Arc::clone(&clock));
        let cancel = CancellationToken::new();

        let first = tokens.get_token(&cancel).await.unwrap();
        clock.advance(Duration::minutes(24));
        let second = tokens.get_token(&cancel).await.unwrap();
        assert_eq!(first, second);

        clock.advance(Duration::minutes(2));
        let third = tokens.get_token(&cancel).await.unwrap();
        assert_eq!(third.value, "token-2");
        assert_eq!(acquirer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tokens.acquisition_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_new_acquisition() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let acquirer = Arc::new(CountingAcquirer {
            calls: AtomicU32::new(0),
            clock: Arc::clone(&clock),
            lifetime: Duration::hours(1),
        });
        let tokens = manager(Arc::clone(&acquirer), clock);
        let cancel = CancellationToken::new();

        tokens.get_token(&cancel).await.unwrap();
        tokens.invalidate().await;
        assert!(tokens.cached_token().await.is_none());
        let token = tokens.get_token(&cancel).await.unwrap();
        assert_eq!(token.value, "token-2");
    }
}
