// ABOUTME: Narrow per-source capability driven by the generic polling scheduler
// ABOUTME: Adapters fetch, normalize, and submit one cycle given an optional backfill start
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! # Connector adapters
//!
//! A data source plugs into the engine by implementing [`ConnectorAdapter`]. The
//! scheduler owns timing, recovery, and state; the adapter only runs one sync cycle.

use crate::submit::{submit_in_batches, DataSubmitter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nocturne_core::errors::ConnectorError;
use nocturne_core::models::{ConnectorConfiguration, DataType, SyncCycleResult};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything an adapter needs for one cycle
#[derive(Clone)]
pub struct SyncContext {
    /// Read-only configuration snapshot
    pub config: Arc<ConnectorConfiguration>,
    /// Downstream collaborator for normalized records
    pub submitter: Arc<dyn DataSubmitter>,
    /// Start of the window this cycle must cover
    pub since: DateTime<Utc>,
    /// Cycle number since the scheduler started (1-based)
    pub cycle: u64,
    /// When the cycle began
    pub started_at: DateTime<Utc>,
}

impl SyncContext {
    /// Connector id from the configuration
    #[must_use]
    pub fn connector_id(&self) -> &str {
        &self.config.connector_id
    }

    /// Submit records of `data_type` in configured batches
    ///
    /// # Errors
    ///
    /// Propagates the first failed batch.
    pub async fn submit(
        &self,
        data_type: DataType,
        records: &[Value],
        cancel: &CancellationToken,
    ) -> Result<usize, ConnectorError> {
        submit_in_batches(
            self.submitter.as_ref(),
            &self.config.connector_id,
            data_type,
            records,
            self.config.batch_size,
            cancel,
        )
        .await
    }

    /// Fresh result for this cycle
    #[must_use]
    pub fn begin_result(&self) -> SyncCycleResult {
        SyncCycleResult::started(self.connector_id(), self.started_at)
    }
}

/// One data source
#[async_trait]
pub trait ConnectorAdapter: Send + Sync + 'static {
    /// Stable connector identifier
    fn connector_id(&self) -> &str;

    /// Check required configuration before the first cycle
    ///
    /// A failure here is fatal: the scheduler never starts its loop.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` describing what is missing.
    fn validate_configuration(&self, config: &ConnectorConfiguration) -> Result<(), ConnectorError> {
        let _ = config;
        Ok(())
    }

    /// Fetch, normalize, and submit one cycle's worth of data
    ///
    /// `backfill_from` is set when the cycle must reconcile an outage window starting
    /// at that instant; `ctx.since` already accounts for it.
    ///
    /// # Errors
    ///
    /// Any error counts as a failed cycle. Returning `Ok` with `success == false`
    /// is also treated as a failure.
    async fn execute_sync(
        &self,
        backfill_from: Option<DateTime<Utc>>,
        ctx: &SyncContext,
        cancel: &CancellationToken,
    ) -> Result<SyncCycleResult, ConnectorError>;

    /// Best-effort bookkeeping after a successful cycle
    ///
    /// Runs as a background task; failures are logged and never affect the cycle.
    ///
    /// # Errors
    ///
    /// Any error is logged by the scheduler.
    async fn record_sync_checkpoint(&self, at: DateTime<Utc>) -> Result<(), ConnectorError> {
        let _ = at;
        Ok(())
    }
}
