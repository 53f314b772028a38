// ABOUTME: Shared data models for connectors, sync cycles, tokens, and metrics snapshots
// ABOUTME: Plain serializable types exchanged between the engine and the host service
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

/// Connector configuration snapshot and credentials
pub mod config;
/// Durable connector checkpoint and per-cycle results
pub mod sync;
/// Cached bearer credential
pub mod token;

pub use config::{ConnectorConfiguration, ConnectorCredentials, ConnectorEndpoints};
pub use sync::{ConnectorState, DataType, MetricsSnapshot, SyncCycleResult};
pub use token::AuthToken;
