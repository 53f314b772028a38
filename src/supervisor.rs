// ABOUTME: Runs one polling scheduler per enabled connector on a shared JoinSet
// ABOUTME: Propagates host shutdown through a cancellation token and reaps scheduler exits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use crate::config::ServerConfig;
use crate::feeds::{describe_feeds, JsonFeedConnector};
use nocturne_core::errors::{AppError, AppResult};
use nocturne_core::models::ConnectorConfiguration;
use nocturne_engine::{
    Clock, ConnectorAdapter, ConnectorStateStore, CycleOutcome, DataSubmitter, MetricsRegistry,
    PollingScheduler, RetryDelayStrategy, SchedulerExit, SchedulerStatus, SystemClock,
};
use reqwest::Client;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit of one supervised scheduler
pub type SchedulerReport = (String, AppResult<SchedulerExit>);

/// Owns every running scheduler of the host
pub struct ConnectorSupervisor {
    store: Arc<dyn ConnectorStateStore>,
    submitter: Arc<dyn DataSubmitter>,
    metrics: Arc<MetricsRegistry>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    tasks: JoinSet<SchedulerReport>,
    statuses: Vec<watch::Receiver<SchedulerStatus>>,
}

impl ConnectorSupervisor {
    /// Create an empty supervisor
    pub fn new(
        store: Arc<dyn ConnectorStateStore>,
        submitter: Arc<dyn DataSubmitter>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            submitter,
            metrics,
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
            statuses: Vec::new(),
        }
    }

    /// Use `clock` for every scheduler created from now on
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token cancelled on shutdown; hand clones to long-lived collaborators
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Status watches of every spawned scheduler
    #[must_use]
    pub fn statuses(&self) -> &[watch::Receiver<SchedulerStatus>] {
        &self.statuses
    }

    /// Number of schedulers still running
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    fn scheduler<A: ConnectorAdapter>(
        &self,
        adapter: Arc<A>,
        config: ConnectorConfiguration,
    ) -> PollingScheduler<A> {
        let metrics = self.metrics.tracker(&config.connector_id);
        PollingScheduler::new(
            adapter,
            config,
            Arc::clone(&self.store),
            Arc::clone(&self.submitter),
            metrics,
        )
        .with_clock(Arc::clone(&self.clock))
    }

    /// Start a scheduler for `adapter` on its own task
    pub fn spawn<A: ConnectorAdapter>(
        &mut self,
        adapter: Arc<A>,
        config: ConnectorConfiguration,
    ) -> watch::Receiver<SchedulerStatus> {
        let connector_id = config.connector_id.clone();
        let scheduler = self.scheduler(adapter, config);
        let status = scheduler.status();
        let cancel = self.shutdown.child_token();

        self.tasks
            .spawn(async move { (connector_id, scheduler.run(cancel).await) });
        self.statuses.push(status.clone());
        status
    }

    /// Run a single cycle of `adapter` in the foreground
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the adapter rejects its configuration.
    pub async fn run_once<A: ConnectorAdapter>(
        &self,
        adapter: Arc<A>,
        config: ConnectorConfiguration,
    ) -> AppResult<CycleOutcome> {
        let mut scheduler = self.scheduler(adapter, config);
        scheduler.run_once(&self.shutdown).await
    }

    /// Run one cycle of every connector in order
    ///
    /// A connector that rejects its configuration is reported and does not stop the
    /// remaining ones.
    pub async fn run_each_once<A: ConnectorAdapter>(
        &self,
        connectors: Vec<(Arc<A>, ConnectorConfiguration)>,
    ) -> Vec<(String, AppResult<CycleOutcome>)> {
        let mut reports = Vec::with_capacity(connectors.len());
        for (adapter, config) in connectors {
            let connector_id = config.connector_id.clone();
            let result = self.run_once(adapter, config).await;
            match &result {
                Ok(CycleOutcome::Succeeded(cycle)) => {
                    info!(connector = %connector_id, items = cycle.total_items(), "cycle succeeded");
                }
                Ok(CycleOutcome::Failed { error, .. }) => {
                    error!(connector = %connector_id, error = %error, "cycle failed");
                }
                Ok(CycleOutcome::Standby | CycleOutcome::Cancelled) => {}
                Err(e) => error!(connector = %connector_id, error = %e, "connector not runnable"),
            }
            reports.push((connector_id, result));
        }
        reports
    }

    /// Cancel every scheduler; in-flight cycles abandon without writing state
    pub fn shutdown(&self) {
        info!(schedulers = self.tasks.len(), "shutting down connector schedulers");
        self.shutdown.cancel();
    }

    /// Wait for every scheduler to exit
    ///
    /// A scheduler that panicked or was aborted is reported as an internal error.
    pub async fn wait(&mut self) -> Vec<SchedulerReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((connector_id, result)) => {
                    match &result {
                        Ok(exit) => info!(connector = %connector_id, exit = ?exit, "scheduler exited"),
                        Err(e) => error!(connector = %connector_id, error = %e, "scheduler failed"),
                    }
                    reports.push((connector_id, result));
                }
                Err(e) => {
                    error!(error = %e, "scheduler task did not complete");
                    reports.push((
                        "unknown".to_owned(),
                        Err(AppError::internal(format!("scheduler task failed: {e}"))),
                    ));
                }
            }
        }
        reports
    }
}

/// Feed connectors for every enabled connector in `config`
///
/// Connectors whose credentials cannot drive any login flow are logged and skipped.
#[must_use]
pub fn build_feed_connectors(
    config: &ServerConfig,
    client: &Client,
    strategy: &Arc<dyn RetryDelayStrategy>,
    shutdown: &CancellationToken,
) -> Vec<(Arc<JsonFeedConnector>, ConnectorConfiguration)> {
    config
        .enabled_connectors()
        .filter_map(|connector| {
            match JsonFeedConnector::from_config(
                connector,
                client.clone(),
                Arc::clone(strategy),
                shutdown.clone(),
            ) {
                Ok(adapter) => {
                    info!(
                        connector = %connector.connector_id,
                        interval_minutes = connector.sync_interval_minutes,
                        feeds = ?describe_feeds(connector),
                        "connector configured"
                    );
                    Some((Arc::new(adapter), connector.clone()))
                }
                Err(e) => {
                    warn!(connector = %connector.connector_id, error = %e, "connector skipped");
                    None
                }
            }
        })
        .collect()
}

/// Resolve on Ctrl+C or SIGTERM
///
/// If a handler cannot be installed, that signal source is ignored and the other
/// one still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
