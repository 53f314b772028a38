// ABOUTME: Environment variable names read by the connector host configuration
// ABOUTME: Global settings plus the per-connector CONNECTOR_<ID>_* key suffixes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

/// Database URL for the connector state store
pub const DATABASE_URL: &str = "DATABASE_URL";
/// Port for the health-check HTTP surface
pub const HEALTH_PORT: &str = "HEALTH_PORT";
/// Deployment environment name
pub const ENVIRONMENT: &str = "ENVIRONMENT";
/// Downstream data API base URL
pub const NOCTURNE_API_URL: &str = "NOCTURNE_API_URL";
/// Downstream data API secret
pub const NOCTURNE_API_SECRET: &str = "NOCTURNE_API_SECRET";
/// Comma-separated connector ids to configure
pub const NOCTURNE_CONNECTORS: &str = "NOCTURNE_CONNECTORS";
/// Shared HTTP client request timeout
pub const HTTP_CLIENT_TIMEOUT_SECS: &str = "HTTP_CLIENT_TIMEOUT_SECS";
/// Shared HTTP client connect timeout
pub const HTTP_CLIENT_CONNECT_TIMEOUT_SECS: &str = "HTTP_CLIENT_CONNECT_TIMEOUT_SECS";

/// Retry base delay override
pub const RETRY_BASE_DELAY_MS: &str = "NOCTURNE_RETRY_BASE_DELAY_MS";
/// Retry delay cap override
pub const RETRY_MAX_DELAY_MS: &str = "NOCTURNE_RETRY_MAX_DELAY_MS";
/// Retry multiplier override
pub const RETRY_MULTIPLIER: &str = "NOCTURNE_RETRY_MULTIPLIER";
/// Retry jitter factor override
pub const RETRY_JITTER_FACTOR: &str = "NOCTURNE_RETRY_JITTER_FACTOR";

/// Prefix of every per-connector variable (`CONNECTOR_<ID>_<KEY>`)
pub const CONNECTOR_PREFIX: &str = "CONNECTOR_";

/// Per-connector key suffixes
pub mod connector_keys {
    /// Enable flag
    pub const ENABLED: &str = "ENABLED";
    /// Polling interval in minutes
    pub const SYNC_INTERVAL_MINUTES: &str = "SYNC_INTERVAL_MINUTES";
    /// Per-request retry budget
    pub const MAX_RETRY_ATTEMPTS: &str = "MAX_RETRY_ATTEMPTS";
    /// Submission batch size
    pub const BATCH_SIZE: &str = "BATCH_SIZE";
    /// Provider timezone offset in hours
    pub const TIMEZONE_OFFSET: &str = "TIMEZONE_OFFSET";
    /// Minutes of remaining lifetime below which a token is refreshed
    pub const TOKEN_LIFETIME_BUFFER_MINUTES: &str = "TOKEN_LIFETIME_BUFFER_MINUTES";
    /// Provider API base URL
    pub const BASE_URL: &str = "BASE_URL";
    /// Provider token endpoint
    pub const TOKEN_URL: &str = "TOKEN_URL";
    /// Login username
    pub const USERNAME: &str = "USERNAME";
    /// Login password
    pub const PASSWORD: &str = "PASSWORD";
    /// OAuth client id
    pub const CLIENT_ID: &str = "CLIENT_ID";
    /// OAuth client secret
    pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
    /// OAuth refresh token
    pub const REFRESH_TOKEN: &str = "REFRESH_TOKEN";
    /// Static API key
    pub const API_KEY: &str = "API_KEY";
    /// Prefix for per-data-type feed paths (`FEED_GLUCOSE`, `FEED_TREATMENTS`, ...)
    pub const FEED_PREFIX: &str = "FEED_";
}
