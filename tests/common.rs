// ABOUTME: Shared test utilities and fake collaborators for integration tests
// ABOUTME: Provides quiet logging, scripted adapters, counting acquirers, and failing stores
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]
//! Shared test utilities for `nocturne_connectors`

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use nocturne_connectors::engine::{
    Clock, ConnectorAdapter, ConnectorStateStore, SyncContext, TokenAcquirer,
};
use nocturne_connectors::errors::ConnectorError;
use nocturne_connectors::models::{AuthToken, ConnectorConfiguration, ConnectorState, DataType, SyncCycleResult};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Fixed wall-clock origin for deterministic tests
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// What a scripted cycle does
#[derive(Debug, Clone)]
pub enum Step {
    /// Submit `n` glucose records and succeed
    Succeed(usize),
    /// Submit `n` glucose records after running for the given duration
    SucceedAfter(usize, Duration),
    /// Return a retryable error
    Fail,
    /// Report `success == false` without an error
    SoftFail,
    /// Panic inside the adapter
    Panic,
    /// Never finish (until the scheduler abandons the cycle)
    Hang,
}

/// One observed `execute_sync` call
#[derive(Debug, Clone)]
pub struct Call {
    /// Clock reading at entry
    pub at: DateTime<Utc>,
    /// Backfill marker passed by the scheduler
    pub backfill_from: Option<DateTime<Utc>>,
    /// Window start in the context
    pub since: DateTime<Utc>,
}

/// Adapter that follows a script and cancels `stop` after the last scripted step
pub struct ScriptedAdapter {
    clock: Arc<dyn Clock>,
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
    checkpoints: AtomicU32,
    stop: CancellationToken,
    invalid_config: bool,
}

impl ScriptedAdapter {
    pub fn new(clock: Arc<dyn Clock>, steps: Vec<Step>, stop: CancellationToken) -> Self {
        Self {
            clock,
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
            checkpoints: AtomicU32::new(0),
            stop,
            invalid_config: false,
        }
    }

    /// Reject every configuration
    pub fn with_invalid_config(mut self) -> Self {
        self.invalid_config = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn checkpoints(&self) -> u32 {
        self.checkpoints.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectorAdapter for ScriptedAdapter {
    fn connector_id(&self) -> &str {
        "scripted"
    }

    fn validate_configuration(&self, _config: &ConnectorConfiguration) -> Result<(), ConnectorError> {
        if self.invalid_config {
            return Err(ConnectorError::Configuration("missing credential: username".into()));
        }
        Ok(())
    }

    async fn execute_sync(
        &self,
        backfill_from: Option<DateTime<Utc>>,
        ctx: &SyncContext,
        cancel: &CancellationToken,
    ) -> Result<SyncCycleResult, ConnectorError> {
        self.calls.lock().unwrap().push(Call {
            at: self.clock.now(),
            backfill_from,
            since: ctx.since,
        });
        let (step, last) = {
            let mut steps = self.steps.lock().unwrap();
            let step = steps.pop_front().unwrap_or(Step::Succeed(0));
            (step, steps.is_empty())
        };

        let outcome = match step {
            Step::SucceedAfter(n, took) => {
                tokio::time::sleep(took).await;
                let records: Vec<_> = (0..n)
                    .map(|i| json!({ "sgv": 100 + i, "date": ctx.started_at.timestamp_millis() }))
                    .collect();
                let submitted = ctx.submit(DataType::Glucose, &records, cancel).await?;
                let mut result = ctx.begin_result();
                result.record_items(DataType::Glucose, submitted, Some(ctx.started_at));
                Ok(result)
            }
            Step::Succeed(n) => {
                let records: Vec<_> = (0..n)
                    .map(|i| json!({ "sgv": 100 + i, "date": ctx.started_at.timestamp_millis() }))
                    .collect();
                let submitted = ctx.submit(DataType::Glucose, &records, cancel).await?;
                let mut result = ctx.begin_result();
                result.record_items(DataType::Glucose, submitted, Some(ctx.started_at));
                Ok(result)
            }
            Step::Fail => Err(ConnectorError::from_status(503, "upstream unavailable")),
            Step::SoftFail => Ok(ctx.begin_result().failed("partial outage", ctx.started_at)),
            Step::Panic => panic!("adapter bug"),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                Ok(ctx.begin_result())
            }
        };
        if last {
            self.stop.cancel();
        }
        outcome
    }

    async fn record_sync_checkpoint(&self, _at: DateTime<Utc>) -> Result<(), ConnectorError> {
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store whose reads always fail and which counts attempted writes
#[derive(Default)]
pub struct UnavailableStore {
    pub saves: AtomicU32,
}

#[async_trait]
impl ConnectorStateStore for UnavailableStore {
    async fn get_state(&self, _connector_id: &str) -> Result<Option<ConnectorState>, ConnectorError> {
        Err(ConnectorError::Storage("database is locked".into()))
    }

    async fn save_state(&self, _state: &ConnectorState) -> Result<(), ConnectorError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Acquirer answering from a script of results, with an optional artificial latency
pub struct ScriptedAcquirer {
    results: Mutex<VecDeque<Result<AuthToken, ConnectorError>>>,
    latency: Duration,
    pub calls: AtomicU32,
}

impl ScriptedAcquirer {
    pub fn new(results: Vec<Result<AuthToken, ConnectorError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenAcquirer for ScriptedAcquirer {
    async fn acquire_token(&self) -> Result<AuthToken, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ConnectorError::Network("script exhausted".into())))
    }
}

/// Connector configuration polling every `minutes`
pub fn connector_config(minutes: u32) -> ConnectorConfiguration {
    ConnectorConfiguration::new("scripted").with_sync_interval_minutes(minutes)
}
