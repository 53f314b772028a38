// ABOUTME: Durable connector checkpoint contract and an in-memory implementation
// ABOUTME: Stores merge incoming state so last_successful_sync_at never moves backwards
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nocturne_core::errors::ConnectorError;
use nocturne_core::models::ConnectorState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Key-value store of connector checkpoints
///
/// The scheduler is the single writer per connector and writes once per completed
/// cycle. Implementations must keep the watermark monotonic on save
/// (see [`ConnectorState::merged_with`]).
#[async_trait]
pub trait ConnectorStateStore: Send + Sync {
    /// Load the checkpoint for `connector_id`
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Storage` when the backing store is unavailable.
    async fn get_state(&self, connector_id: &str) -> Result<Option<ConnectorState>, ConnectorError>;

    /// Persist a complete checkpoint in one write
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Storage` when the write failed; the previous
    /// checkpoint is left untouched.
    async fn save_state(&self, state: &ConnectorState) -> Result<(), ConnectorError>;

    /// Completion time of the last successful cycle
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Storage` when the backing store is unavailable.
    async fn get_last_successful_sync(
        &self,
        connector_id: &str,
    ) -> Result<Option<DateTime<Utc>>, ConnectorError> {
        Ok(self
            .get_state(connector_id)
            .await?
            .and_then(|state| state.last_successful_sync_at))
    }

    /// Record a successful sync time, keeping the failure counter as stored
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Storage` when the read or write failed.
    async fn set_last_successful_sync(
        &self,
        connector_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ConnectorError> {
        let mut state = self
            .get_state(connector_id)
            .await?
            .unwrap_or_else(|| ConnectorState::new(connector_id));
        state.last_successful_sync_at = Some(at);
        self.save_state(&state).await
    }
}

/// Process-local state store
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, ConnectorState>>,
    writes: AtomicU64,
}

impl InMemoryStateStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed writes since creation
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectorStateStore for InMemoryStateStore {
    async fn get_state(&self, connector_id: &str) -> Result<Option<ConnectorState>, ConnectorError> {
        Ok(self.states.read().await.get(connector_id).cloned())
    }

    async fn save_state(&self, state: &ConnectorState) -> Result<(), ConnectorError> {
        let mut states = self.states.write().await;
        let merged = states
            .get(&state.connector_id)
            .map_or_else(|| state.clone(), |stored| stored.merged_with(state));
        states.insert(state.connector_id.clone(), merged);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_connector_has_no_state() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.get_state("missing").await.unwrap(), None);
        assert_eq!(store.get_last_successful_sync("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_successful_sync_never_regresses() {
        let store = InMemoryStateStore::new();
        store.set_last_successful_sync("cgm", at(10)).await.unwrap();
        store.set_last_successful_sync("cgm", at(8)).await.unwrap();
        assert_eq!(
            store.get_last_successful_sync("cgm").await.unwrap(),
            Some(at(10))
        );
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_count_is_taken_from_incoming_state() {
        let store = InMemoryStateStore::new();
        let state = ConnectorState::new("pump").after_success(at(3));
        store.save_state(&state.after_failure()).await.unwrap();
        store
            .save_state(&state.after_failure().after_failure())
            .await
            .unwrap();

        let stored = store.get_state("pump").await.unwrap().unwrap();
        assert_eq!(stored.consecutive_failure_count, 2);
        assert_eq!(stored.last_successful_sync_at, Some(at(3)));
    }
}
