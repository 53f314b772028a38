// ABOUTME: SQLite-backed connector checkpoint store built on sqlx
// ABOUTME: Upserts keep last_successful_sync_at monotonic inside a single statement
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! # Connector state database
//!
//! One row per connector in `connector_state`. Timestamps are stored as Unix
//! microseconds so the watermark can be compared and maxed in SQL.

use crate::config::DatabaseUrl;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nocturne_core::errors::{AppError, AppResult, ConnectorError};
use nocturne_core::models::ConnectorState;
use nocturne_engine::ConnectorStateStore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

/// Durable checkpoint store
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: Pool<Sqlite>,
}

impl SqliteStateStore {
    /// Open (creating if needed) the database and run migrations
    ///
    /// In-memory databases use a single connection so every query sees the same data.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created, the connection fails, or
    /// the schema cannot be applied.
    pub async fn connect(url: &DatabaseUrl) -> AppResult<Self> {
        if let DatabaseUrl::SQLite { path } = url {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::database(format!(
                        "Failed to create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&url.to_connection_string())
            .map_err(|e| AppError::database(format!("Invalid database URL {url}: {e}")))?
            .create_if_missing(true);
        let max_connections = if url.is_memory() { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to open {url}: {e}")))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(database = %url, "connector state store ready");
        Ok(store)
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create the schema if missing
    ///
    /// # Errors
    ///
    /// Returns an error when the DDL fails.
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS connector_state (
                connector_id TEXT PRIMARY KEY,
                last_successful_sync_at INTEGER,
                consecutive_failure_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create connector_state: {e}")))?;
        Ok(())
    }

    /// Every stored checkpoint, ordered by connector id
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Storage` when the query fails.
    pub async fn list_states(&self) -> Result<Vec<ConnectorState>, ConnectorError> {
        let rows = sqlx::query(
            r"
            SELECT connector_id, last_successful_sync_at, consecutive_failure_count
            FROM connector_state
            ORDER BY connector_id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list connector states", &e))?;

        rows.iter().map(row_to_state).collect()
    }
}

#[async_trait]
impl ConnectorStateStore for SqliteStateStore {
    async fn get_state(&self, connector_id: &str) -> Result<Option<ConnectorState>, ConnectorError> {
        let row = sqlx::query(
            r"
            SELECT connector_id, last_successful_sync_at, consecutive_failure_count
            FROM connector_state
            WHERE connector_id = ?1
            ",
        )
        .bind(connector_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("load connector state", &e))?;

        row.as_ref().map(row_to_state).transpose()
    }

    async fn save_state(&self, state: &ConnectorState) -> Result<(), ConnectorError> {
        let watermark = state.last_successful_sync_at.map(|t| t.timestamp_micros());
        let failures = i64::from(state.consecutive_failure_count);

        sqlx::query(
            r"
            INSERT INTO connector_state
                (connector_id, last_successful_sync_at, consecutive_failure_count, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(connector_id) DO UPDATE SET
                last_successful_sync_at = CASE
                    WHEN excluded.last_successful_sync_at IS NULL
                        THEN connector_state.last_successful_sync_at
                    WHEN connector_state.last_successful_sync_at IS NULL
                        THEN excluded.last_successful_sync_at
                    ELSE MAX(connector_state.last_successful_sync_at, excluded.last_successful_sync_at)
                END,
                consecutive_failure_count = excluded.consecutive_failure_count,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&state.connector_id)
        .bind(watermark)
        .bind(failures)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("save connector state", &e))?;

        debug!(
            connector = %state.connector_id,
            failures = state.consecutive_failure_count,
            "checkpoint saved"
        );
        Ok(())
    }
}

fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<ConnectorState, ConnectorError> {
    let micros: Option<i64> = row.get("last_successful_sync_at");
    let failures: i64 = row.get("consecutive_failure_count");

    let last_successful_sync_at = micros
        .map(|m| {
            DateTime::<Utc>::from_timestamp_micros(m).ok_or_else(|| {
                ConnectorError::Storage(format!("stored watermark out of range: {m}"))
            })
        })
        .transpose()?;

    Ok(ConnectorState {
        connector_id: row.get("connector_id"),
        last_successful_sync_at,
        consecutive_failure_count: u32::try_from(failures).unwrap_or(u32::MAX),
    })
}

fn storage_error(action: &str, error: &sqlx::Error) -> ConnectorError {
    ConnectorError::Storage(format!("failed to {action}: {error}"))
}
