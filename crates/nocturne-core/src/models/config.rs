// ABOUTME: Per-connector configuration snapshot consumed by the scheduler and adapters
// ABOUTME: Clamps intervals, retry budgets, and batch sizes into supported ranges
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use crate::constants::{limits, retry, scheduling};
use crate::errors::ConnectorError;
use crate::models::DataType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Static settings for one data-source connector
///
/// The host builds one of these per connector and hands the scheduler a read-only
/// snapshot. Numeric fields are clamped on construction so the engine never sees
/// out-of-range values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfiguration {
    /// Stable identifier, also the key in the state store
    pub connector_id: String,
    /// When false the scheduler stays in standby and never polls
    pub enabled: bool,
    /// Steady-state polling interval in minutes
    pub sync_interval_minutes: u32,
    /// Retry budget for each outbound request
    pub max_retry_attempts: u32,
    /// Records per downstream submission
    pub batch_size: usize,
    /// Provider-local timezone offset in hours
    pub timezone_offset: f64,
    /// Minimum remaining token lifetime before a refresh is forced
    pub token_lifetime_buffer_minutes: i64,
    /// Login material
    pub credentials: ConnectorCredentials,
    /// Provider endpoints
    pub endpoints: ConnectorEndpoints,
}

impl ConnectorConfiguration {
    /// Configuration with defaults for `connector_id`
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            enabled: true,
            sync_interval_minutes: scheduling::DEFAULT_SYNC_INTERVAL_MINUTES,
            max_retry_attempts: retry::DEFAULT_MAX_RETRY_ATTEMPTS,
            batch_size: limits::DEFAULT_BATCH_SIZE,
            timezone_offset: 0.0,
            token_lifetime_buffer_minutes: retry::DEFAULT_TOKEN_LIFETIME_BUFFER_MINUTES,
            credentials: ConnectorCredentials::default(),
            endpoints: ConnectorEndpoints::default(),
        }
    }

    /// Set the enabled flag
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the polling interval, clamped to the supported range
    #[must_use]
    pub fn with_sync_interval_minutes(mut self, minutes: u32) -> Self {
        self.sync_interval_minutes = clamp_sync_interval(minutes);
        self
    }

    /// Set the per-request retry budget, clamped
    #[must_use]
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts.min(retry::MAX_RETRY_ATTEMPTS_LIMIT);
        self
    }

    /// Set the submission batch size, clamped
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(limits::MIN_BATCH_SIZE, limits::MAX_BATCH_SIZE);
        self
    }

    /// Set the provider timezone offset in hours
    #[must_use]
    pub const fn with_timezone_offset(mut self, hours: f64) -> Self {
        self.timezone_offset = hours;
        self
    }

    /// Set credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: ConnectorCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set endpoints
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: ConnectorEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Re-apply clamping after fields were assigned directly
    #[must_use]
    pub fn clamped(self) -> Self {
        let max_retry_attempts = self.max_retry_attempts;
        let batch_size = self.batch_size;
        let minutes = self.sync_interval_minutes;
        self.with_sync_interval_minutes(minutes)
            .with_max_retry_attempts(max_retry_attempts)
            .with_batch_size(batch_size)
    }

    /// Interval between cycles while the connector is healthy
    #[must_use]
    pub fn normal_polling_interval(&self) -> Duration {
        Duration::from_secs(u64::from(clamp_sync_interval(self.sync_interval_minutes)) * 60)
    }

    /// Token refresh buffer as a chrono duration
    #[must_use]
    pub fn token_lifetime_buffer(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.token_lifetime_buffer_minutes.max(0))
    }

    /// Provider timezone offset as a chrono duration
    #[must_use]
    pub fn timezone_offset_duration(&self) -> chrono::Duration {
        // Offsets are bounded to +/-14h so the cast is lossless
        #[allow(clippy::cast_possible_truncation)]
        let seconds = (self.timezone_offset * 3_600.0).round() as i64;
        chrono::Duration::seconds(seconds)
    }
}

fn clamp_sync_interval(minutes: u32) -> u32 {
    minutes.clamp(
        scheduling::MIN_SYNC_INTERVAL_MINUTES,
        scheduling::MAX_SYNC_INTERVAL_MINUTES,
    )
}

/// Login material for a provider
///
/// Which fields are required depends on the provider's login flow; adapters check
/// their own requirements through [`ConnectorCredentials::require`].
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConnectorCredentials {
    /// Account username or email
    pub username: Option<String>,
    /// Account password
    pub password: Option<String>,
    /// OAuth client id
    pub client_id: Option<String>,
    /// OAuth client secret
    pub client_secret: Option<String>,
    /// Long-lived OAuth refresh token
    pub refresh_token: Option<String>,
    /// Static API key
    pub api_key: Option<String>,
}

impl ConnectorCredentials {
    /// Fetch a required credential by name
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` when the credential is absent or blank.
    pub fn require<'a>(
        &'a self,
        name: &str,
        value: Option<&'a String>,
    ) -> Result<&'a str, ConnectorError> {
        value
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConnectorError::Configuration(format!("missing credential: {name}")))
    }

    /// Required username
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` when absent.
    pub fn require_username(&self) -> Result<&str, ConnectorError> {
        self.require("username", self.username.as_ref())
    }

    /// Required password
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` when absent.
    pub fn require_password(&self) -> Result<&str, ConnectorError> {
        self.require("password", self.password.as_ref())
    }

    /// Required OAuth client id
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` when absent.
    pub fn require_client_id(&self) -> Result<&str, ConnectorError> {
        self.require("client_id", self.client_id.as_ref())
    }

    /// Required OAuth refresh token
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` when absent.
    pub fn require_refresh_token(&self) -> Result<&str, ConnectorError> {
        self.require("refresh_token", self.refresh_token.as_ref())
    }
}

impl fmt::Debug for ConnectorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ConnectorCredentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

/// Provider endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorEndpoints {
    /// API base URL
    pub base_url: Option<String>,
    /// Token endpoint URL
    pub token_url: Option<String>,
    /// Feed path per data type, relative to `base_url`
    pub feeds: BTreeMap<DataType, String>,
}
