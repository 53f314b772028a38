// ABOUTME: Downstream data submission contract and batch chunking helper
// ABOUTME: The engine hands opaque JSON records to a submitter without inspecting them
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use async_trait::async_trait;
use nocturne_core::errors::ConnectorError;
use nocturne_core::models::DataType;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Persists normalized records somewhere downstream
#[async_trait]
pub trait DataSubmitter: Send + Sync {
    /// Submit one batch of records and return how many were accepted
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Submission` (or a transport error) when the batch was
    /// not accepted.
    async fn submit(
        &self,
        connector_id: &str,
        data_type: DataType,
        records: &[Value],
        cancel: &CancellationToken,
    ) -> Result<usize, ConnectorError>;
}

/// Submit `records` in chunks of `batch_size`
///
/// Stops at the first failed chunk; records of earlier chunks stay submitted.
///
/// # Errors
///
/// Returns the failing chunk's error, or `ConnectorError::Cancelled` when `cancel`
/// fired between chunks.
pub async fn submit_in_batches(
    submitter: &dyn DataSubmitter,
    connector_id: &str,
    data_type: DataType,
    records: &[Value],
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<usize, ConnectorError> {
    let mut accepted = 0;
    for (index, chunk) in records.chunks(batch_size.max(1)).enumerate() {
        if cancel.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }
        accepted += submitter
            .submit(connector_id, data_type, chunk, cancel)
            .await?;
        debug!(
            connector = connector_id,
            data_type = %data_type,
            batch = index,
            records = chunk.len(),
            "batch submitted"
        );
    }
    Ok(accepted)
}

/// Submitter that keeps every batch in memory
///
/// Grows with every batch, so only suited to single-cycle runs and tests.
#[derive(Debug, Default)]
pub struct MemorySubmitter {
    batches: Mutex<Vec<(String, DataType, Vec<Value>)>>,
}

impl MemorySubmitter {
    /// Empty submitter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch received so far, in order
    #[must_use]
    pub fn batches(&self) -> Vec<(String, DataType, Vec<Value>)> {
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Total records received for `data_type`
    #[must_use]
    pub fn record_count(&self, data_type: DataType) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|(_, dt, _)| *dt == data_type)
            .map(|(_, _, records)| records.len())
            .sum()
    }
}

#[async_trait]
impl DataSubmitter for MemorySubmitter {
    async fn submit(
        &self,
        connector_id: &str,
        data_type: DataType,
        records: &[Value],
        _cancel: &CancellationToken,
    ) -> Result<usize, ConnectorError> {
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((connector_id.to_owned(), data_type, records.to_vec()));
        Ok(records.len())
    }
}

/// Submitter that accepts and drops every record, keeping only a running count
///
/// Used by long-running hosts with no data API configured.
#[derive(Debug, Default)]
pub struct DiscardingSubmitter {
    accepted: AtomicU64,
}

impl DiscardingSubmitter {
    /// Submitter with a zero count
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records dropped so far
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DataSubmitter for DiscardingSubmitter {
    async fn submit(
        &self,
        connector_id: &str,
        data_type: DataType,
        records: &[Value],
        _cancel: &CancellationToken,
    ) -> Result<usize, ConnectorError> {
        let count = u64::try_from(records.len()).unwrap_or(u64::MAX);
        let total = self.accepted.fetch_add(count, Ordering::Relaxed) + count;
        debug!(
            connector = connector_id,
            data_type = %data_type,
            records = records.len(),
            total,
            "batch discarded, no data API configured"
        );
        Ok(records.len())
    }
}
