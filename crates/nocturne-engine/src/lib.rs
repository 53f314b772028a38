// ABOUTME: Connector synchronization resilience engine shared by every Nocturne data source
// ABOUTME: Polling scheduler, token lifecycle, retry policy, state contract, and metrics
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

#![deny(unsafe_code)]

//! # Nocturne Engine
//!
//! The engine keeps a continuous data feed alive against unreliable, rate-limited
//! provider APIs. A data source supplies only a narrow [`adapter::ConnectorAdapter`];
//! the engine provides everything around it.
//!
//! ## Components (leaves first)
//!
//! - **retry**: [`retry::RetryDelayStrategy`] and the shared retry executor
//! - **token**: [`token::AuthTokenManager`], single-flight bearer token lifecycle
//! - **adapter**: the per-source capability and its [`adapter::SyncContext`]
//! - **state**: [`state::ConnectorStateStore`] checkpoint contract
//! - **metrics**: [`metrics::MetricsTracker`] lock-light counters for health checks
//! - **scheduler**: [`scheduler::PollingScheduler`], the loop composing all of the above
//!
//! Supporting modules: `clock`, `submit` (downstream submission and batching),
//! `http_client` (shared client and classified requests), `oauth` (generic acquirers).

/// Wall-clock abstraction
pub mod clock;

/// Retry delay strategies and the retry executor
pub mod retry;

/// Bearer token lifecycle with single-flight acquisition
pub mod token;

/// Connector adapter contract
pub mod adapter;

/// Downstream data submission
pub mod submit;

/// Connector checkpoint storage contract
pub mod state;

/// In-memory connector metrics
pub mod metrics;

/// Polling scheduler
pub mod scheduler;

/// Shared HTTP client and request helpers
pub mod http_client;

/// Generic OAuth2 and API-key token acquirers
pub mod oauth;

pub use adapter::{ConnectorAdapter, SyncContext};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use metrics::{MetricsRegistry, MetricsTracker};
pub use retry::{execute_with_retry, ExponentialBackoff, FixedDelay, Jitter, RetryBackoffConfig, RetryDelayStrategy};
pub use scheduler::{
    CycleOutcome, PollingScheduler, RecoveryPolicy, SchedulerExit, SchedulerState, SchedulerStatus,
};
pub use state::{ConnectorStateStore, InMemoryStateStore};
pub use submit::{submit_in_batches, DataSubmitter, DiscardingSubmitter, MemorySubmitter};
pub use token::{AuthTokenManager, TokenAcquirer};
