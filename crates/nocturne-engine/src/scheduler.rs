// ABOUTME: Polling scheduler driving one connector adapter through sync cycles
// ABOUTME: Owns timing, fast-recovery transitions, backfill pinning, and checkpoint writes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! # Polling scheduler
//!
//! One [`PollingScheduler`] runs per connector. Each iteration executes one sync cycle,
//! writes the resulting [`ConnectorState`] once, and sleeps for an interval chosen by
//! health: the normal polling interval after a success, a shorter fast-recovery delay
//! after a failure.
//!
//! ## State machine
//!
//! ```text
//! Starting -> Standby                       (connector disabled)
//! Starting -> Normal <-> FastRecovery       (any failure / first success)
//! Normal | FastRecovery -> Stopped          (host cancellation only)
//! ```
//!
//! Sync failures never stop the loop. Only a configuration error detected before the
//! first cycle prevents it from starting.
//!
//! ## Backfill
//!
//! After a restart the stored `last_successful_sync_at` becomes the backfill marker of
//! the first cycle. During a failure streak the marker stays pinned at the last
//! known-good timestamp, so the first successful cycle reconciles the whole outage
//! window in one pass.

use crate::adapter::{ConnectorAdapter, SyncContext};
use crate::clock::{Clock, SystemClock};
use crate::metrics::MetricsTracker;
use crate::state::ConnectorStateStore;
use crate::submit::DataSubmitter;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use nocturne_core::constants::scheduling;
use nocturne_core::errors::{AppError, AppResult, ConnectorError};
use nocturne_core::models::{ConnectorConfiguration, ConnectorState, SyncCycleResult};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How long shutdown waits for outstanding checkpoint tasks
const CHECKPOINT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Fast-recovery delay policy
///
/// Capped exponential: `floor * multiplier^(failures-1)`, bounded by
/// `min(ceiling, normal / 2)`. The effective floor is also limited to `normal / 2`,
/// so every delay satisfies `floor <= delay < normal`. With the defaults (30s floor,
/// x2, 300s ceiling) and a 5 minute interval the delays are 30s, 60s, 120s, 150s, 150s...
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryPolicy {
    floor: Duration,
    multiplier: f64,
    ceiling: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(scheduling::FAST_RECOVERY_FLOOR_SECS),
            scheduling::FAST_RECOVERY_MULTIPLIER,
            Duration::from_secs(scheduling::FAST_RECOVERY_CEILING_SECS),
        )
    }
}

impl RecoveryPolicy {
    /// Custom policy; `multiplier` below 1.0 is treated as 1.0
    #[must_use]
    pub fn new(floor: Duration, multiplier: f64, ceiling: Duration) -> Self {
        Self {
            floor,
            multiplier: multiplier.max(1.0),
            ceiling: ceiling.max(floor),
        }
    }

    /// Configured floor
    #[must_use]
    pub const fn floor(&self) -> Duration {
        self.floor
    }

    /// Delay before the next cycle after `consecutive_failures` failed cycles
    #[must_use]
    pub fn delay(&self, consecutive_failures: u32, normal: Duration) -> Duration {
        let half = normal / 2;
        let floor = self.floor.min(half);
        let cap = self.ceiling.min(half).max(floor);
        let exponent = i32::try_from(consecutive_failures.max(1) - 1).unwrap_or(i32::MAX);
        let secs = floor.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            return cap;
        }
        Duration::from_secs_f64(secs).max(floor)
    }
}

/// Health state of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Created, loop not yet entered
    Starting,
    /// Connector disabled; never polls
    Standby,
    /// Last cycle succeeded
    Normal,
    /// Last cycle failed; polling on the fast-recovery cadence
    FastRecovery,
    /// Loop exited after host cancellation, or never started
    Stopped,
}

/// Latest scheduler status, published on every transition
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Connector identifier
    pub connector_id: String,
    /// Current state
    pub state: SchedulerState,
    /// Failed cycles since the last success
    pub consecutive_failures: u32,
    /// Cycles executed since start
    pub cycles_run: u64,
    /// Checkpoint watermark
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    /// Pinned start of the window the next cycle must reconcile
    pub backfill_from: Option<DateTime<Utc>>,
    /// Delay before the next cycle, in seconds
    pub next_poll_secs: Option<u64>,
    /// Most recent cycle outcome
    pub last_cycle: Option<SyncCycleResult>,
    /// Most recent failure description
    pub last_error: Option<String>,
}

impl SchedulerStatus {
    fn starting(connector_id: &str) -> Self {
        Self {
            connector_id: connector_id.to_owned(),
            state: SchedulerState::Starting,
            consecutive_failures: 0,
            cycles_run: 0,
            last_successful_sync_at: None,
            backfill_from: None,
            next_poll_secs: None,
            last_cycle: None,
            last_error: None,
        }
    }
}

/// Why [`PollingScheduler::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// Connector disabled; no loop was started
    Standby,
    /// Host cancellation observed after `cycles` cycles
    Stopped {
        /// Cycles executed
        cycles: u64,
    },
}

/// Result of a single cycle
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Connector disabled; nothing ran
    Standby,
    /// Cycle completed and the checkpoint advanced
    Succeeded(SyncCycleResult),
    /// Cycle failed; the backfill marker stays pinned
    Failed {
        /// Failure description
        error: String,
        /// Failed cycles since the last success, this one included
        consecutive_failures: u32,
    },
    /// Host cancellation interrupted the cycle; no state was written
    Cancelled,
}

impl CycleOutcome {
    /// True for [`CycleOutcome::Succeeded`]
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Cooperative polling loop for one connector
pub struct PollingScheduler<A: ConnectorAdapter> {
    adapter: Arc<A>,
    config: Arc<ConnectorConfiguration>,
    store: Arc<dyn ConnectorStateStore>,
    submitter: Arc<dyn DataSubmitter>,
    metrics: Arc<MetricsTracker>,
    recovery: RecoveryPolicy,
    clock: Arc<dyn Clock>,
    status: watch::Sender<SchedulerStatus>,
    background: JoinSet<()>,
    state: ConnectorState,
    state_loaded: bool,
    backfill_from: Option<DateTime<Utc>>,
    cycles: u64,
}

impl<A: ConnectorAdapter> PollingScheduler<A> {
    /// Create a scheduler; configuration values are clamped
    pub fn new(
        adapter: Arc<A>,
        config: ConnectorConfiguration,
        store: Arc<dyn ConnectorStateStore>,
        submitter: Arc<dyn DataSubmitter>,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        let config = config.clamped();
        let (status, _) = watch::channel(SchedulerStatus::starting(&config.connector_id));
        Self {
            state: ConnectorState::new(config.connector_id.clone()),
            adapter,
            config: Arc::new(config),
            store,
            submitter,
            metrics,
            recovery: RecoveryPolicy::default(),
            clock: Arc::new(SystemClock),
            status,
            background: JoinSet::new(),
            state_loaded: false,
            backfill_from: None,
            cycles: 0,
        }
    }

    /// Use `clock` for cycle timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the fast-recovery policy
    #[must_use]
    pub fn with_recovery_policy(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Connector identifier
    #[must_use]
    pub fn connector_id(&self) -> &str {
        &self.config.connector_id
    }

    /// Subscribe to status updates
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    /// Steady-state polling interval
    #[must_use]
    pub fn normal_interval(&self) -> Duration {
        self.config.normal_polling_interval()
    }

    /// Run until `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns a configuration `AppError` when the adapter rejects its configuration;
    /// the loop is never started in that case. Sync failures never end the loop.
    pub async fn run(mut self, cancel: CancellationToken) -> AppResult<SchedulerExit> {
        if !self.prepare()? {
            return Ok(SchedulerExit::Standby);
        }

        let normal = self.normal_interval();
        info!(
            connector = %self.config.connector_id,
            interval_secs = normal.as_secs(),
            max_retry_attempts = self.config.max_retry_attempts,
            "polling scheduler started"
        );

        loop {
            let delay = match self.run_cycle(&cancel).await {
                CycleOutcome::Succeeded(_) | CycleOutcome::Standby => normal,
                CycleOutcome::Failed {
                    consecutive_failures,
                    ..
                } => self.recovery.delay(consecutive_failures, normal),
                CycleOutcome::Cancelled => break,
            };

            self.status
                .send_modify(|status| status.next_poll_secs = Some(delay.as_secs()));
            debug!(
                connector = %self.config.connector_id,
                delay_secs = delay.as_secs(),
                "sleeping until next cycle"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.status.send_modify(|status| {
            status.state = SchedulerState::Stopped;
            status.next_poll_secs = None;
        });
        self.drain_background().await;
        info!(
            connector = %self.config.connector_id,
            cycles = self.cycles,
            "polling scheduler stopped"
        );
        Ok(SchedulerExit::Stopped {
            cycles: self.cycles,
        })
    }

    /// Execute exactly one cycle, then wait for its checkpoint task
    ///
    /// # Errors
    ///
    /// Returns a configuration `AppError` when the adapter rejects its configuration.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> AppResult<CycleOutcome> {
        if !self.prepare()? {
            return Ok(CycleOutcome::Standby);
        }
        let outcome = self.run_cycle(cancel).await;
        self.drain_background().await;
        Ok(outcome)
    }

    /// Standby and configuration checks; `Ok(false)` means standby
    fn prepare(&mut self) -> AppResult<bool> {
        if !self.config.enabled {
            info!(connector = %self.config.connector_id, "connector disabled, standing by");
            self.status
                .send_modify(|status| status.state = SchedulerState::Standby);
            return Ok(false);
        }

        if let Err(e) = self.adapter.validate_configuration(&self.config) {
            error!(
                connector = %self.config.connector_id,
                error = %e,
                "invalid connector configuration, scheduler not started"
            );
            let message = e.to_string();
            self.status.send_modify(|status| {
                status.state = SchedulerState::Stopped;
                status.last_error = Some(message);
            });
            return Err(AppError::config_invalid(format!(
                "connector {}: {e}",
                self.config.connector_id
            ))
            .with_source(e));
        }
        Ok(true)
    }

    async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        self.cycles += 1;
        let span = info_span!(
            "sync_cycle",
            connector = %self.config.connector_id,
            cycle = self.cycles
        );
        self.execute_cycle(cancel).instrument(span).await
    }

    async fn execute_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        if let Err(e) = self.ensure_state_loaded().await {
            warn!(error = %e, "connector state unavailable, cycle skipped");
            return self.record_failure(e.to_string(), None, None, false).await;
        }

        let started_at = self.clock.now();
        let backfill_from = self.backfill_from;
        let since = backfill_from
            .or(self.state.last_successful_sync_at)
            .unwrap_or_else(|| {
                started_at - chrono::Duration::hours(scheduling::DEFAULT_INITIAL_LOOKBACK_HOURS)
            });
        let ctx = SyncContext {
            config: Arc::clone(&self.config),
            submitter: Arc::clone(&self.submitter),
            since,
            cycle: self.cycles,
            started_at,
        };
        info!(since = %since, backfill = backfill_from.is_some(), "sync cycle starting");

        let adapter = Arc::clone(&self.adapter);
        let execution =
            AssertUnwindSafe(adapter.execute_sync(backfill_from, &ctx, cancel)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("shutdown during sync cycle, checkpoint left untouched");
                return CycleOutcome::Cancelled;
            }
            outcome = execution => outcome,
        };
        let finished_at = self.clock.now();

        match outcome {
            // A result without an error is a completed cycle; adapters mark failures with `failed`
            Ok(Ok(result)) => match result.error.clone() {
                None => {
                    self.record_success(result.succeeded(finished_at), started_at)
                        .await
                }
                Some(message) => {
                    self.record_failure(message, Some(result), Some(since), true)
                        .await
                }
            },
            Ok(Err(ConnectorError::Cancelled)) if cancel.is_cancelled() => {
                info!("sync cycle cancelled, checkpoint left untouched");
                CycleOutcome::Cancelled
            }
            Ok(Err(e)) => {
                self.record_failure(e.to_string(), None, Some(since), true)
                    .await
            }
            Err(_) => {
                error!("adapter panicked during sync cycle");
                self.record_failure(
                    "adapter panicked during sync cycle".to_owned(),
                    None,
                    Some(since),
                    true,
                )
                .await
            }
        }
    }

    async fn ensure_state_loaded(&mut self) -> Result<(), ConnectorError> {
        if self.state_loaded {
            return Ok(());
        }
        let stored = self.store.get_state(&self.config.connector_id).await?;
        let mut state = stored.unwrap_or_else(|| ConnectorState::new(self.config.connector_id.clone()));
        state.consecutive_failure_count = state
            .consecutive_failure_count
            .max(self.state.consecutive_failure_count);

        if let Some(last) = state.last_successful_sync_at {
            if self.backfill_from.is_none() {
                info!(backfill_from = %last, "resuming from stored checkpoint");
                self.backfill_from = Some(last);
            }
        }
        self.state = state;
        self.state_loaded = true;

        let last = self.state.last_successful_sync_at;
        let backfill = self.backfill_from;
        self.status.send_modify(|status| {
            status.last_successful_sync_at = last;
            status.backfill_from = backfill;
        });
        Ok(())
    }

    /// Advance the checkpoint to `watermark`, the instant the cycle's fetch window closed
    ///
    /// Records created while the cycle ran fall after the watermark and are picked up by
    /// the next cycle.
    async fn record_success(
        &mut self,
        result: SyncCycleResult,
        watermark: DateTime<Utc>,
    ) -> CycleOutcome {
        let finished_at = result.finished_at.unwrap_or(watermark);
        let next_state = self.state.after_success(watermark);
        self.persist(&next_state).await;
        self.state = next_state;
        self.backfill_from = None;

        let items = u64::try_from(result.total_items()).unwrap_or(u64::MAX);
        self.metrics.track_entries(items, result.latest_record_at);
        self.metrics.track_sync_at(finished_at);
        self.spawn_checkpoint(watermark);

        info!(
            items,
            duration_ms = (finished_at - watermark).num_milliseconds(),
            "sync cycle succeeded"
        );

        let last = self.state.last_successful_sync_at;
        let cycles = self.cycles;
        let published = result.clone();
        self.status.send_modify(|status| {
            status.state = SchedulerState::Normal;
            status.consecutive_failures = 0;
            status.cycles_run = cycles;
            status.last_successful_sync_at = last;
            status.backfill_from = None;
            status.last_cycle = Some(published);
            status.last_error = None;
        });
        CycleOutcome::Succeeded(result)
    }

    async fn record_failure(
        &mut self,
        message: String,
        result: Option<SyncCycleResult>,
        since: Option<DateTime<Utc>>,
        persist: bool,
    ) -> CycleOutcome {
        let next_state = self.state.after_failure();
        if persist {
            self.persist(&next_state).await;
        }
        self.state = next_state;
        if self.backfill_from.is_none() {
            self.backfill_from = since;
        }

        if let Some(partial) = result.as_ref().filter(|r| r.total_items() > 0) {
            let items = u64::try_from(partial.total_items()).unwrap_or(u64::MAX);
            self.metrics.track_entries(items, partial.latest_record_at);
        }

        let failures = self.state.consecutive_failure_count;
        warn!(
            consecutive_failures = failures,
            backfill_from = ?self.backfill_from,
            error = %message,
            "sync cycle failed"
        );

        let backfill = self.backfill_from;
        let cycles = self.cycles;
        let error = message.clone();
        self.status.send_modify(|status| {
            status.state = SchedulerState::FastRecovery;
            status.consecutive_failures = failures;
            status.cycles_run = cycles;
            status.backfill_from = backfill;
            status.last_cycle = result;
            status.last_error = Some(error);
        });
        CycleOutcome::Failed {
            error: message,
            consecutive_failures: failures,
        }
    }

    /// Single write of a fully computed checkpoint
    async fn persist(&self, state: &ConnectorState) {
        if let Err(e) = self.store.save_state(state).await {
            warn!(error = %e, "failed to persist connector state");
        }
    }

    fn spawn_checkpoint(&mut self, at: DateTime<Utc>) {
        self.reap_background();
        let adapter = Arc::clone(&self.adapter);
        let connector_id = self.config.connector_id.clone();
        self.background.spawn(async move {
            if let Err(e) = adapter.record_sync_checkpoint(at).await {
                warn!(connector = %connector_id, error = %e, "sync checkpoint hook failed");
            }
        });
    }

    fn reap_background(&mut self) {
        while let Some(joined) = self.background.try_join_next() {
            if let Err(e) = joined {
                warn!(connector = %self.config.connector_id, error = %e, "checkpoint task aborted");
            }
        }
    }

    async fn drain_background(&mut self) {
        let connector_id = self.config.connector_id.clone();
        let background = &mut self.background;
        let drain = async {
            while let Some(joined) = background.join_next().await {
                if let Err(e) = joined {
                    warn!(connector = %connector_id, error = %e, "checkpoint task aborted");
                }
            }
        };
        if tokio::time::timeout(CHECKPOINT_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(connector = %connector_id, "checkpoint tasks still running at shutdown, aborting");
            self.background.abort_all();
        }
    }
}
