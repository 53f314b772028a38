// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Scheduling defaults, clamping limits, and service identifiers for connectors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! Constants module
//!
//! Constants are grouped by domain rather than kept in one large list.

/// Environment variable names
pub mod env_config;

/// API endpoints
pub mod endpoints {
    /// Overall health check endpoint
    pub const HEALTH: &str = "/health";
    /// Per-connector health endpoint
    pub const HEALTH_CONNECTORS: &str = "/health/connectors";
    /// Downstream data API prefix
    pub const DATA_API_PREFIX: &str = "/api/v1";
}

/// Network ports
pub mod ports {
    /// Default health-check HTTP port
    pub const DEFAULT_HEALTH_PORT: u16 = 8085;
}

/// Service names used in logs and health responses
pub mod service_names {
    /// Connector host service
    pub const NOCTURNE_CONNECTORS: &str = "nocturne-connectors";
}

/// Polling cadence for the scheduler
pub mod scheduling {
    /// Default `SyncIntervalMinutes`
    pub const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 5;
    /// Lowest accepted `SyncIntervalMinutes`
    pub const MIN_SYNC_INTERVAL_MINUTES: u32 = 1;
    /// Highest accepted `SyncIntervalMinutes`
    pub const MAX_SYNC_INTERVAL_MINUTES: u32 = 60;

    /// First fast-recovery delay after a failed cycle
    pub const FAST_RECOVERY_FLOOR_SECS: u64 = 30;
    /// Growth factor between consecutive fast-recovery delays
    pub const FAST_RECOVERY_MULTIPLIER: f64 = 2.0;
    /// Absolute ceiling for a fast-recovery delay
    pub const FAST_RECOVERY_CEILING_SECS: u64 = 300;

    /// Lookback window for the first ever sync of a connector
    pub const DEFAULT_INITIAL_LOOKBACK_HOURS: i64 = 24;

    /// Consecutive failures after which a connector reports unhealthy
    pub const UNHEALTHY_FAILURE_THRESHOLD: u32 = 5;
}

/// Retry and token defaults
pub mod retry {
    /// Default `MaxRetryAttempts`
    pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
    /// Highest accepted `MaxRetryAttempts`
    pub const MAX_RETRY_ATTEMPTS_LIMIT: u32 = 10;
    /// Default base delay for outbound retries
    pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
    /// Default delay cap for outbound retries
    pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
    /// Default multiplier for outbound retries
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;
    /// Default jitter factor (0.0 disables jitter)
    pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

    /// Default `TokenLifetimeBufferMinutes`
    pub const DEFAULT_TOKEN_LIFETIME_BUFFER_MINUTES: i64 = 5;
    /// Lifetime assumed when a token endpoint omits `expires_in`
    pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3_600;
}

/// Batching and buffer limits
pub mod limits {
    /// Default `BatchSize`
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    /// Lowest accepted `BatchSize`
    pub const MIN_BATCH_SIZE: usize = 1;
    /// Highest accepted `BatchSize`
    pub const MAX_BATCH_SIZE: usize = 1_000;
    /// Capacity of the recent-timestamp ring in the metrics tracker
    pub const RECENT_TIMESTAMPS_CAPACITY: usize = 50;
    /// Hours covered by the rolling entry-rate window
    pub const ENTRY_RATE_WINDOW_HOURS: i64 = 24;
}

/// HTTP client timeouts
pub mod http {
    /// Default per-request timeout
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    /// Default connect timeout
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
    /// User agent sent to providers
    pub const USER_AGENT: &str = concat!("nocturne-connectors/", env!("CARGO_PKG_VERSION"));
}
