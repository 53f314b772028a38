// ABOUTME: Health endpoints reporting service status and per-connector scheduler state
// ABOUTME: Combines scheduler status watches, metrics snapshots, and a database probe
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! Health check endpoints
//!
//! - `GET /health`: overall status plus component checks. 503 when unhealthy.
//! - `GET /health/connectors`: scheduler status and metrics for every connector.

use crate::database::SqliteStateStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use nocturne_core::constants::{endpoints, scheduling, service_names};
use nocturne_core::models::MetricsSnapshot;
use nocturne_engine::{MetricsRegistry, SchedulerState, SchedulerStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Overall health status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything works
    Healthy,
    /// Working, but at least one connector is recovering
    Degraded,
    /// A component or connector is failing
    Unhealthy,
}

/// Service information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name
    pub name: String,
    /// Service version
    pub version: String,
    /// Deployment environment
    pub environment: String,
    /// Seconds since the health checker was created
    pub uptime_seconds: u64,
}

/// Individual component health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Status description
    pub message: String,
}

/// `GET /health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across all checks
    pub status: HealthStatus,
    /// Service information
    pub service: ServiceInfo,
    /// Component checks, one per connector plus the database
    pub checks: Vec<ComponentHealth>,
    /// Response time
    pub timestamp: DateTime<Utc>,
}

/// One connector in `GET /health/connectors`
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorHealth {
    /// Derived health
    pub status: HealthStatus,
    /// Scheduler status
    pub scheduler: SchedulerStatus,
    /// Metrics snapshot
    pub metrics: MetricsSnapshot,
}

/// Builds health reports from live scheduler state
pub struct HealthChecker {
    start_time: Instant,
    environment: String,
    metrics: Arc<MetricsRegistry>,
    database: Option<SqliteStateStore>,
    connectors: BTreeMap<String, watch::Receiver<SchedulerStatus>>,
}

impl HealthChecker {
    /// Create a checker with no connectors registered
    #[must_use]
    pub fn new(environment: impl Into<String>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            start_time: Instant::now(),
            environment: environment.into(),
            metrics,
            database: None,
            connectors: BTreeMap::new(),
        }
    }

    /// Probe `database` on every `/health` request
    #[must_use]
    pub fn with_database(mut self, database: SqliteStateStore) -> Self {
        self.database = Some(database);
        self
    }

    /// Report on a scheduler through its status watch
    #[must_use]
    pub fn with_connector(mut self, status: watch::Receiver<SchedulerStatus>) -> Self {
        let connector_id = status.borrow().connector_id.clone();
        self.connectors.insert(connector_id, status);
        self
    }

    /// Overall health
    pub async fn health(&self) -> HealthResponse {
        let mut checks: Vec<ComponentHealth> = self
            .connectors
            .iter()
            .map(|(connector_id, status)| {
                let status = status.borrow();
                ComponentHealth {
                    name: format!("connector:{connector_id}"),
                    status: connector_health(&status),
                    message: describe(&status),
                }
            })
            .collect();

        if let Some(database) = &self.database {
            checks.push(check_database(database).await);
        }

        let status = checks
            .iter()
            .map(|check| check.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthResponse {
            status,
            service: ServiceInfo {
                name: service_names::NOCTURNE_CONNECTORS.to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                environment: self.environment.clone(),
                uptime_seconds: self.start_time.elapsed().as_secs(),
            },
            checks,
            timestamp: Utc::now(),
        }
    }

    /// Per-connector detail
    #[must_use]
    pub fn connectors(&self) -> BTreeMap<String, ConnectorHealth> {
        self.connectors
            .iter()
            .map(|(connector_id, status)| {
                let scheduler = status.borrow().clone();
                let health = ConnectorHealth {
                    status: connector_health(&scheduler),
                    metrics: self.metrics.tracker(connector_id).snapshot(),
                    scheduler,
                };
                (connector_id.clone(), health)
            })
            .collect()
    }

    /// Health routes with request tracing
    pub fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route(endpoints::HEALTH, get(health_handler))
            .route(endpoints::HEALTH_CONNECTORS, get(connectors_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }
}

/// Map a scheduler status onto a health level
#[must_use]
pub fn connector_health(status: &SchedulerStatus) -> HealthStatus {
    if status.consecutive_failures >= scheduling::UNHEALTHY_FAILURE_THRESHOLD {
        return HealthStatus::Unhealthy;
    }
    match status.state {
        SchedulerState::FastRecovery => HealthStatus::Degraded,
        SchedulerState::Stopped if status.last_error.is_some() && status.cycles_run == 0 => {
            HealthStatus::Unhealthy
        }
        SchedulerState::Starting
        | SchedulerState::Standby
        | SchedulerState::Normal
        | SchedulerState::Stopped => HealthStatus::Healthy,
    }
}

fn describe(status: &SchedulerStatus) -> String {
    match (&status.state, &status.last_error) {
        (SchedulerState::FastRecovery, Some(error)) => format!(
            "{} consecutive failures, last: {error}",
            status.consecutive_failures
        ),
        (SchedulerState::Stopped, Some(error)) => format!("stopped: {error}"),
        (SchedulerState::Standby, _) => "disabled".to_owned(),
        _ => status.last_successful_sync_at.map_or_else(
            || "no successful sync yet".to_owned(),
            |at| format!("last successful sync at {}", at.to_rfc3339()),
        ),
    }
}

async fn check_database(database: &SqliteStateStore) -> ComponentHealth {
    match sqlx::query("SELECT 1").execute(database.pool()).await {
        Ok(_) => ComponentHealth {
            name: "database".to_owned(),
            status: HealthStatus::Healthy,
            message: "connector state store reachable".to_owned(),
        },
        Err(e) => ComponentHealth {
            name: "database".to_owned(),
            status: HealthStatus::Unhealthy,
            message: format!("connector state store unreachable: {e}"),
        },
    }
}

async fn health_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let response = checker.health().await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn connectors_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    Json(checker.connectors())
}
