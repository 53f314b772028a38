// ABOUTME: Integration tests for bearer token caching, single-flight acquisition, and retries
// ABOUTME: Runs under paused tokio time so retry sleeps are observable without waiting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

mod common;

use chrono::Utc;
use common::{init_test_logging, ScriptedAcquirer};
use nocturne_connectors::engine::{AuthTokenManager, FixedDelay};
use nocturne_connectors::errors::ConnectorError;
use nocturne_connectors::models::AuthToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn token(value: &str, minutes: i64) -> AuthToken {
    AuthToken::expiring_in(value, Utc::now(), chrono::Duration::minutes(minutes))
}

fn manager(acquirer: &Arc<ScriptedAcquirer>, delay_secs: u64, max_retries: u32) -> AuthTokenManager {
    init_test_logging();
    AuthTokenManager::new(
        "cgm",
        acquirer.clone(),
        Arc::new(FixedDelay(Duration::from_secs(delay_secs))),
        max_retries,
        chrono::Duration::minutes(5),
    )
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_acquisition() {
    let acquirer = Arc::new(
        ScriptedAcquirer::new(vec![Ok(token("shared", 60))]).with_latency(Duration::from_secs(2)),
    );
    let tokens = Arc::new(manager(&acquirer, 1, 3));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let tokens = Arc::clone(&tokens);
        handles.push(tokio::spawn(async move {
            tokens.get_token(&CancellationToken::new()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().value, "shared");
    }

    assert_eq!(acquirer.calls(), 1);
    assert_eq!(tokens.acquisition_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cached_token_is_reused_within_lifetime() {
    let acquirer = Arc::new(ScriptedAcquirer::new(vec![Ok(token("first", 60))]));
    let tokens = manager(&acquirer, 1, 3);
    let cancel = CancellationToken::new();

    let first = tokens.get_token(&cancel).await.unwrap();
    let second = tokens.get_token(&cancel).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(acquirer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_returns_immediately() {
    let acquirer = Arc::new(ScriptedAcquirer::new(vec![Err(ConnectorError::from_status(
        401,
        "invalid password",
    ))]));
    let tokens = manager(&acquirer, 30, 5);
    let started = Instant::now();

    let error = tokens.get_token(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(error, ConnectorError::TokenUnavailable { .. }), "{error:?}");
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(acquirer.calls(), 1);
    assert!(tokens.cached_token().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_strategy_delay() {
    let acquirer = Arc::new(ScriptedAcquirer::new(vec![
        Err(ConnectorError::from_status(503, "maintenance")),
        Err(ConnectorError::Network("connection reset".into())),
        Ok(token("recovered", 60)),
    ]));
    let tokens = manager(&acquirer, 2, 3);
    let started = Instant::now();

    let token = tokens.get_token(&CancellationToken::new()).await.unwrap();
    assert_eq!(token.value, "recovered");
    assert_eq!(acquirer.calls(), 3);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(4) && waited < Duration::from_secs(5), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_acquisition_caches_nothing() {
    let acquirer = Arc::new(ScriptedAcquirer::new(
        (0..3)
            .map(|_| Err(ConnectorError::from_status(502, "bad gateway")))
            .chain(std::iter::once(Ok(token("later", 60))))
            .collect(),
    ));
    let tokens = manager(&acquirer, 1, 2);
    let cancel = CancellationToken::new();

    let error = tokens.get_token(&cancel).await.unwrap_err();
    assert!(matches!(error, ConnectorError::TokenUnavailable { .. }));
    assert_eq!(acquirer.calls(), 3);
    assert!(tokens.cached_token().await.is_none());

    // The next cycle starts a fresh acquisition
    assert_eq!(tokens.get_token(&cancel).await.unwrap().value, "later");
    assert_eq!(tokens.acquisition_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_token_inside_refresh_buffer_is_replaced() {
    let acquirer = Arc::new(ScriptedAcquirer::new(vec![
        Ok(token("short", 4)),
        Ok(token("long", 60)),
    ]));
    let tokens = manager(&acquirer, 1, 0);
    let cancel = CancellationToken::new();

    assert_eq!(tokens.get_token(&cancel).await.unwrap().value, "short");
    assert_eq!(tokens.get_token(&cancel).await.unwrap().value, "long");
    assert_eq!(tokens.get_token(&cancel).await.unwrap().value, "long");
    assert_eq!(acquirer.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_new_login() {
    let acquirer = Arc::new(ScriptedAcquirer::new(vec![
        Ok(token("revoked", 60)),
        Ok(token("fresh", 60)),
    ]));
    let tokens = manager(&acquirer, 1, 0);
    let cancel = CancellationToken::new();

    assert_eq!(tokens.get_token(&cancel).await.unwrap().value, "revoked");
    tokens.invalidate().await;
    assert_eq!(tokens.get_token(&cancel).await.unwrap().value, "fresh");
}

#[tokio::test(start_paused = true)]
async fn test_waiting_caller_observes_cancellation() {
    let acquirer = Arc::new(
        ScriptedAcquirer::new(vec![Ok(token("slow", 60))]).with_latency(Duration::from_secs(3_600)),
    );
    let tokens = Arc::new(manager(&acquirer, 1, 0));
    let cancel = CancellationToken::new();

    let waiter = {
        let tokens = Arc::clone(&tokens);
        let cancel = cancel.clone();
        tokio::spawn(async move { tokens.get_token(&cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();

    assert_eq!(waiter.await.unwrap(), Err(ConnectorError::Cancelled));
}
