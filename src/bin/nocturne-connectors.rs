// ABOUTME: Connector service binary running one polling scheduler per configured connector
// ABOUTME: Serves health endpoints and shuts down cleanly on Ctrl+C or SIGTERM
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! # Nocturne Connectors Binary
//!
//! Loads configuration from the environment, opens the checkpoint database, and keeps
//! every enabled connector synchronized until shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use nocturne_connectors::config::ServerConfig;
use nocturne_connectors::constants::retry;
use nocturne_connectors::database::SqliteStateStore;
use nocturne_connectors::engine::http_client::{initialize_shared_client, shared_client};
use nocturne_connectors::engine::{CycleOutcome, MetricsRegistry};
use nocturne_connectors::feeds::JsonFeedConnector;
use nocturne_connectors::health::HealthChecker;
use nocturne_connectors::logging;
use nocturne_connectors::models::ConnectorConfiguration;
use nocturne_connectors::submission::{build_submitter, SubmissionMode};
use nocturne_connectors::supervisor::{build_feed_connectors, shutdown_signal, ConnectorSupervisor};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "nocturne-connectors")]
#[command(about = "Nocturne connector service - keeps third-party data synchronized")]
pub struct Args {
    /// Override the health endpoint port
    #[arg(long)]
    health_port: Option<u16>,

    /// Run one cycle per connector and exit
    #[arg(long)]
    once: bool,

    /// Do not post records; `--once` keeps them in memory, the service drops them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(port) = args.health_port {
        config.health_port = port;
    }

    logging::init_from_env()?;
    info!("Starting Nocturne connectors");
    info!("{}", config.summary());

    initialize_shared_client(
        config.http_client.timeout_secs,
        config.http_client.connect_timeout_secs,
    );
    let client = shared_client();

    let store = SqliteStateStore::connect(&config.database).await?;
    let strategy = config.retry.build();
    let metrics = Arc::new(MetricsRegistry::new());

    let submitter = build_submitter(
        SubmissionMode::select(&config.submission, args.dry_run, args.once),
        &config.submission,
        client.clone(),
        Arc::clone(&strategy),
        retry::DEFAULT_MAX_RETRY_ATTEMPTS,
    )?;

    let mut supervisor =
        ConnectorSupervisor::new(Arc::new(store.clone()), submitter, Arc::clone(&metrics));
    let connectors =
        build_feed_connectors(&config, client, &strategy, &supervisor.shutdown_token());
    if connectors.is_empty() {
        warn!("no enabled connectors, only the health endpoints will run");
    }

    if args.once {
        return run_once(&supervisor, connectors).await;
    }

    let mut health = HealthChecker::new(config.environment.to_string(), metrics)
        .with_database(store);
    for (adapter, connector) in connectors {
        health = health.with_connector(supervisor.spawn(adapter, connector));
    }

    let listener = TcpListener::bind(("0.0.0.0", config.health_port))
        .await
        .with_context(|| format!("failed to bind health port {}", config.health_port))?;
    info!(port = config.health_port, "health endpoints listening");

    let shutdown = supervisor.shutdown_token();
    let server = tokio::spawn(async move {
        axum::serve(listener, Arc::new(health).routes())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    shutdown_signal().await;
    supervisor.shutdown();
    let reports = supervisor.wait().await;
    info!(schedulers = reports.len(), "all schedulers stopped");

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "health server error"),
        Err(e) => error!(error = %e, "health server task failed"),
    }
    Ok(())
}

async fn run_once(
    supervisor: &ConnectorSupervisor,
    connectors: Vec<(Arc<JsonFeedConnector>, ConnectorConfiguration)>,
) -> Result<()> {
    let reports = supervisor.run_each_once(connectors).await;
    let failures = reports
        .iter()
        .filter(|(_, result)| matches!(result, Err(_) | Ok(CycleOutcome::Failed { .. })))
        .count();
    anyhow::ensure!(failures == 0, "{failures} connector cycle(s) failed");
    Ok(())
}
