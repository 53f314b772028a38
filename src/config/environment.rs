// ABOUTME: Environment configuration for the connector service and every configured connector
// ABOUTME: Parses global settings plus CONNECTOR_<ID>_* blocks into clamped connector snapshots
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! Environment-only configuration
//!
//! Global settings come from plain variables (`DATABASE_URL`, `HEALTH_PORT`, ...).
//! Connectors are listed in `NOCTURNE_CONNECTORS` and each one reads its own
//! `CONNECTOR_<ID>_*` block, where `<ID>` is the upper-cased id with `-` replaced by `_`.

use nocturne_core::constants::env_config::{self, connector_keys};
use nocturne_core::constants::{http, limits, ports, retry, scheduling};
use nocturne_core::errors::{AppError, AppResult};
use nocturne_core::models::{
    ConnectorConfiguration, ConnectorCredentials, ConnectorEndpoints, DataType,
};
use nocturne_engine::RetryBackoffConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

/// Deployment environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Production deployment
    Production,
    /// Automated tests
    Testing,
}

impl Environment {
    /// Parse with fallback to development
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Whether this is a production deployment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Testing => "testing",
        })
    }
}

/// Location of the connector state database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseUrl {
    /// SQLite file
    SQLite {
        /// Database file path
        path: PathBuf,
    },
    /// In-memory SQLite (tests)
    Memory,
}

impl DatabaseUrl {
    /// Parse a `sqlite:` URL or bare file path
    #[must_use]
    pub fn parse_url(s: &str) -> Self {
        let path = s.strip_prefix("sqlite://").or_else(|| s.strip_prefix("sqlite:")).unwrap_or(s);
        if path == ":memory:" {
            Self::Memory
        } else {
            Self::SQLite {
                path: PathBuf::from(path),
            }
        }
    }

    /// Connection string for sqlx
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        match self {
            Self::SQLite { path } => format!("sqlite:{}", path.display()),
            Self::Memory => "sqlite::memory:".to_owned(),
        }
    }

    /// Whether the database lives only in memory
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl Default for DatabaseUrl {
    fn default() -> Self {
        Self::SQLite {
            path: PathBuf::from("./data/connectors.db"),
        }
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_connection_string())
    }
}

/// Timeouts applied to every outbound HTTP call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Whole-request timeout
    pub timeout_secs: u64,
    /// Connect timeout
    pub connect_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: http::DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: http::DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Downstream data API
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Base URL of the data API
    pub api_url: Option<String>,
    /// Shared API secret
    pub api_secret: Option<String>,
}

impl fmt::Debug for SubmissionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionConfig")
            .field("api_url", &self.api_url)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Complete service configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Health endpoint port
    pub health_port: u16,
    /// State database
    pub database: DatabaseUrl,
    /// Outbound HTTP timeouts
    pub http_client: HttpClientConfig,
    /// Downstream data API
    pub submission: SubmissionConfig,
    /// Shared retry backoff
    pub retry: RetryBackoffConfig,
    /// Every connector listed in `NOCTURNE_CONNECTORS`
    pub connectors: Vec<ConnectorConfiguration>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a variable is present but unparsable.
    pub fn from_env() -> AppResult<Self> {
        info!("Loading configuration from environment variables");

        let connector_ids = env::var(env_config::NOCTURNE_CONNECTORS)
            .map(|v| parse_connector_ids(&v))
            .unwrap_or_default();
        let connectors = connector_ids
            .iter()
            .map(|id| load_connector(id))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            environment: Environment::from_str_or_default(
                &env::var(env_config::ENVIRONMENT).unwrap_or_default(),
            ),
            health_port: parse_env_or(env_config::HEALTH_PORT, ports::DEFAULT_HEALTH_PORT)?,
            database: env::var(env_config::DATABASE_URL)
                .map(|url| DatabaseUrl::parse_url(&url))
                .unwrap_or_default(),
            http_client: HttpClientConfig {
                timeout_secs: parse_env_or(
                    env_config::HTTP_CLIENT_TIMEOUT_SECS,
                    http::DEFAULT_TIMEOUT_SECS,
                )?,
                connect_timeout_secs: parse_env_or(
                    env_config::HTTP_CLIENT_CONNECT_TIMEOUT_SECS,
                    http::DEFAULT_CONNECT_TIMEOUT_SECS,
                )?,
            },
            submission: SubmissionConfig {
                api_url: non_empty_env(env_config::NOCTURNE_API_URL),
                api_secret: non_empty_env(env_config::NOCTURNE_API_SECRET),
            },
            retry: RetryBackoffConfig::from_env(),
            connectors,
        })
    }

    /// Connectors with `ENABLED=true`
    pub fn enabled_connectors(&self) -> impl Iterator<Item = &ConnectorConfiguration> {
        self.connectors.iter().filter(|c| c.enabled)
    }

    /// Loggable summary without secrets
    #[must_use]
    pub fn summary(&self) -> String {
        let connectors = self
            .connectors
            .iter()
            .map(|c| {
                format!(
                    "{}({}, every {}m, batch {})",
                    c.connector_id,
                    if c.enabled { "enabled" } else { "standby" },
                    c.sync_interval_minutes,
                    c.batch_size
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Nocturne Connectors Configuration:\n\
             - Environment: {}\n\
             - Health Port: {}\n\
             - Database: {}\n\
             - Data API: {}\n\
             - HTTP Timeouts: {}s / connect {}s\n\
             - Retry Backoff: base {}ms, max {}ms, x{}\n\
             - Connectors: {}",
            self.environment,
            self.health_port,
            if self.database.is_memory() { "in-memory" } else { "SQLite" },
            self.submission.api_url.as_deref().unwrap_or("not configured"),
            self.http_client.timeout_secs,
            self.http_client.connect_timeout_secs,
            self.retry.base_delay_ms,
            self.retry.max_delay_ms,
            self.retry.multiplier,
            if connectors.is_empty() { "none".to_owned() } else { connectors },
        )
    }
}

/// Environment key for `key` in connector `connector_id`'s block
#[must_use]
pub fn connector_env_key(connector_id: &str, key: &str) -> String {
    let id: String = connector_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}{id}_{key}", env_config::CONNECTOR_PREFIX)
}

/// Load one connector's `CONNECTOR_<ID>_*` block
///
/// # Errors
///
/// Returns a configuration error when a numeric or boolean value cannot be parsed.
pub fn load_connector(connector_id: &str) -> AppResult<ConnectorConfiguration> {
    let key = |k: &str| connector_env_key(connector_id, k);
    let defaults = ConnectorConfiguration::new(connector_id);

    let enabled = match non_empty_env(&key(connector_keys::ENABLED)) {
        Some(v) => parse_bool(&v).ok_or_else(|| {
            let name = key(connector_keys::ENABLED);
            AppError::config_invalid(format!("Invalid {name} value {v:?}: expected a boolean"))
        })?,
        None => defaults.enabled,
    };

    let credentials = ConnectorCredentials {
        username: non_empty_env(&key(connector_keys::USERNAME)),
        password: non_empty_env(&key(connector_keys::PASSWORD)),
        client_id: non_empty_env(&key(connector_keys::CLIENT_ID)),
        client_secret: non_empty_env(&key(connector_keys::CLIENT_SECRET)),
        refresh_token: non_empty_env(&key(connector_keys::REFRESH_TOKEN)),
        api_key: non_empty_env(&key(connector_keys::API_KEY)),
    };

    let feeds: BTreeMap<DataType, String> = DataType::ALL
        .iter()
        .filter_map(|data_type| {
            let name = format!(
                "{}{}",
                connector_keys::FEED_PREFIX,
                data_type.as_str().to_ascii_uppercase()
            );
            non_empty_env(&key(&name)).map(|path| (*data_type, path))
        })
        .collect();

    let endpoints = ConnectorEndpoints {
        base_url: non_empty_env(&key(connector_keys::BASE_URL)),
        token_url: non_empty_env(&key(connector_keys::TOKEN_URL)),
        feeds,
    };

    let mut config = defaults
        .with_enabled(enabled)
        .with_sync_interval_minutes(parse_env_or(
            &key(connector_keys::SYNC_INTERVAL_MINUTES),
            scheduling::DEFAULT_SYNC_INTERVAL_MINUTES,
        )?)
        .with_max_retry_attempts(parse_env_or(
            &key(connector_keys::MAX_RETRY_ATTEMPTS),
            retry::DEFAULT_MAX_RETRY_ATTEMPTS,
        )?)
        .with_batch_size(parse_env_or(
            &key(connector_keys::BATCH_SIZE),
            limits::DEFAULT_BATCH_SIZE,
        )?)
        .with_timezone_offset(parse_env_or(&key(connector_keys::TIMEZONE_OFFSET), 0.0_f64)?)
        .with_credentials(credentials)
        .with_endpoints(endpoints);
    config.token_lifetime_buffer_minutes = parse_env_or(
        &key(connector_keys::TOKEN_LIFETIME_BUFFER_MINUTES),
        retry::DEFAULT_TOKEN_LIFETIME_BUFFER_MINUTES,
    )?
    .max(0);

    Ok(config)
}

/// Split a comma-separated connector list, dropping blanks and duplicates
#[must_use]
pub fn parse_connector_ids(value: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = id.to_lowercase();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_env_or<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    non_empty_env(key).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|e| AppError::config_invalid(format!("Invalid {key} value {raw:?}: {e}")))
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_env_key_normalizes_id() {
        assert_eq!(
            connector_env_key("dexcom-share", "ENABLED"),
            "CONNECTOR_DEXCOM_SHARE_ENABLED"
        );
    }

    #[test]
    fn test_parse_connector_ids() {
        assert_eq!(
            parse_connector_ids(" Dexcom, libre ,,dexcom"),
            vec!["dexcom".to_owned(), "libre".to_owned()]
        );
    }

    #[test]
    fn test_database_url_parsing() {
        assert_eq!(DatabaseUrl::parse_url("sqlite::memory:"), DatabaseUrl::Memory);
        assert_eq!(
            DatabaseUrl::parse_url("sqlite:./data/x.db").to_connection_string(),
            "sqlite:./data/x.db"
        );
        assert_eq!(
            DatabaseUrl::parse_url("/var/lib/state.db"),
            DatabaseUrl::SQLite {
                path: PathBuf::from("/var/lib/state.db")
            }
        );
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_submission_debug_redacts_secret() {
        let submission = SubmissionConfig {
            api_url: Some("https://ns.example".into()),
            api_secret: Some("super-secret".into()),
        };
        assert!(!format!("{submission:?}").contains("super-secret"));
    }
}
