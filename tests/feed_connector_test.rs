// ABOUTME: End-to-end tests for the JSON feed connector against local fake HTTP services
// ABOUTME: Covers password login, feed fetch, hashed-secret submission, and 401 re-login
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

mod common;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration as ChronoDuration;
use common::{init_test_logging, t0};
use nocturne_connectors::config::SubmissionConfig;
use nocturne_connectors::engine::{
    ConnectorStateStore, CycleOutcome, FixedDelay, InMemoryStateStore, ManualClock, MetricsTracker,
    PollingScheduler,
};
use nocturne_connectors::feeds::JsonFeedConnector;
use nocturne_connectors::models::{
    ConnectorConfiguration, ConnectorCredentials, ConnectorEndpoints, DataType,
};
use nocturne_connectors::submission::{hash_api_secret, HttpDataSubmitter};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const API_SECRET: &str = "correct-horse-battery";

#[derive(Default)]
struct Provider {
    logins: AtomicU32,
    reject_next_fetch: AtomicBool,
    since: Mutex<Vec<String>>,
}

#[derive(Default)]
struct DataApi {
    received: Mutex<Vec<Value>>,
    secrets: Mutex<Vec<String>>,
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn token_handler(State(provider): State<Arc<Provider>>, body: String) -> Json<Value> {
    assert!(body.contains("grant_type=password"), "{body}");
    let n = provider.logins.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "access_token": format!("tok-{n}"), "expires_in": 3600 }))
}

async fn entries_handler(
    State(provider): State<Arc<Provider>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if provider.reject_next_fetch.swap(false, Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, "session expired").into_response();
    }
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer tok-"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "missing bearer").into_response();
    }
    provider
        .since
        .lock()
        .unwrap()
        .push(query.get("since").cloned().unwrap_or_default());

    let base = t0().timestamp_millis();
    Json(json!([
        { "sgv": 110, "date": base - 600_000 },
        { "sgv": 115, "date": base - 300_000 },
        { "sgv": 121, "date": base },
    ]))
    .into_response()
}

async fn submit_handler(
    State(api): State<Arc<DataApi>>,
    headers: HeaderMap,
    Json(records): Json<Vec<Value>>,
) -> StatusCode {
    let secret = headers
        .get("api-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    api.secrets.lock().unwrap().push(secret);
    api.received.lock().unwrap().extend(records);
    StatusCode::OK
}

async fn start_provider() -> (Arc<Provider>, String) {
    let provider = Arc::new(Provider::default());
    let router = Router::new()
        .route("/oauth/token", post(token_handler))
        .route("/entries", get(entries_handler))
        .with_state(Arc::clone(&provider));
    let addr = serve(router).await;
    (provider, format!("http://{addr}"))
}

async fn start_data_api() -> (Arc<DataApi>, String) {
    let api = Arc::new(DataApi::default());
    let router = Router::new()
        .route("/api/v1/entries", post(submit_handler))
        .with_state(Arc::clone(&api));
    let addr = serve(router).await;
    (api, format!("http://{addr}"))
}

fn feed_config(base_url: &str) -> ConnectorConfiguration {
    let mut feeds = BTreeMap::new();
    feeds.insert(DataType::Glucose, "/entries".to_owned());
    ConnectorConfiguration::new("share")
        .with_batch_size(2)
        .with_max_retry_attempts(1)
        .with_credentials(ConnectorCredentials {
            username: Some("pat".into()),
            password: Some("pw".into()),
            ..ConnectorCredentials::default()
        })
        .with_endpoints(ConnectorEndpoints {
            base_url: Some(base_url.to_owned()),
            token_url: Some(format!("{base_url}/oauth/token")),
            feeds,
        })
}

#[tokio::test]
async fn test_feed_cycle_submits_and_relogs_after_401() {
    init_test_logging();
    let (provider, provider_url) = start_provider().await;
    let (api, api_url) = start_data_api().await;

    let client = Client::new();
    let strategy = Arc::new(FixedDelay(Duration::from_millis(10)));
    let config = feed_config(&provider_url);
    let adapter = Arc::new(
        JsonFeedConnector::from_config(
            &config,
            client.clone(),
            strategy.clone(),
            CancellationToken::new(),
        )
        .unwrap(),
    );
    let submitter = HttpDataSubmitter::from_config(
        &SubmissionConfig {
            api_url: Some(api_url),
            api_secret: Some(API_SECRET.into()),
        },
        client,
        strategy,
        1,
    )
    .unwrap();

    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(InMemoryStateStore::new());
    let metrics = Arc::new(MetricsTracker::with_clock(clock.clone()));
    let mut scheduler = PollingScheduler::new(
        Arc::clone(&adapter),
        config,
        store.clone(),
        Arc::new(submitter),
        Arc::clone(&metrics),
    )
    .with_clock(clock.clone());
    let cancel = CancellationToken::new();

    // First cycle: login, fetch three records, submit them in two batches
    match scheduler.run_once(&cancel).await.unwrap() {
        CycleOutcome::Succeeded(result) => {
            assert_eq!(result.items.get(&DataType::Glucose), Some(&3));
            assert_eq!(result.latest_record_at, Some(t0()));
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(provider.logins.load(Ordering::SeqCst), 1);
    assert_eq!(api.received.lock().unwrap().len(), 3);
    assert!(api
        .secrets
        .lock()
        .unwrap()
        .iter()
        .all(|s| *s == hash_api_secret(API_SECRET)));
    assert_eq!(metrics.total_entries(), 3);
    assert_eq!(metrics.last_entry_time(), Some(t0()));

    // Second cycle: the provider revokes the session; the cycle fails and the token is dropped
    clock.advance(ChronoDuration::minutes(5));
    provider.reject_next_fetch.store(true, Ordering::SeqCst);
    assert!(matches!(
        scheduler.run_once(&cancel).await.unwrap(),
        CycleOutcome::Failed { .. }
    ));
    assert!(adapter.tokens().cached_token().await.is_none());

    // Third cycle: fresh login, window pinned at the last success
    clock.advance(ChronoDuration::seconds(30));
    assert!(scheduler.run_once(&cancel).await.unwrap().is_success());
    assert_eq!(provider.logins.load(Ordering::SeqCst), 2);

    let since = provider.since.lock().unwrap().clone();
    assert_eq!(since.len(), 2);
    assert_eq!(since[1], t0().to_rfc3339());

    let state = store.get_state("share").await.unwrap().unwrap();
    assert_eq!(
        state.last_successful_sync_at,
        Some(t0() + ChronoDuration::seconds(330))
    );
}

#[tokio::test]
async fn test_non_array_feed_fails_cycle() {
    init_test_logging();
    let router = Router::new()
        .route(
            "/oauth/token",
            post(|| async { Json(json!({ "access_token": "tok-1", "expires_in": 3600 })) }),
        )
        .route("/entries", get(|| async { Json(json!({ "error": "maintenance" })) }));
    let base_url = format!("http://{}", serve(router).await);

    let config = feed_config(&base_url);
    let adapter = Arc::new(
        JsonFeedConnector::from_config(
            &config,
            Client::new(),
            Arc::new(FixedDelay(Duration::from_millis(1))),
            CancellationToken::new(),
        )
        .unwrap(),
    );
    let mut scheduler = PollingScheduler::new(
        adapter,
        config,
        Arc::new(InMemoryStateStore::new()),
        Arc::new(nocturne_connectors::engine::MemorySubmitter::new()),
        Arc::new(MetricsTracker::new()),
    );

    match scheduler.run_once(&CancellationToken::new()).await.unwrap() {
        CycleOutcome::Failed { error, .. } => assert!(error.contains("expected a JSON array"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
}
