// ABOUTME: Generic JSON feed connector driven entirely by CONNECTOR_<ID>_* configuration
// ABOUTME: Fetches each configured feed since the cycle window start and submits the records
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! # JSON feed connector
//!
//! Works with any provider that exposes `GET {base_url}{feed_path}?since=<rfc3339>`
//! returning a JSON array. The login flow is picked from the configured credentials:
//! an API key, an OAuth refresh token, or a username/password grant.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use nocturne_core::errors::ConnectorError;
use nocturne_core::models::{ConnectorConfiguration, DataType, SyncCycleResult};
use nocturne_engine::http_client::get_json_authorized;
use nocturne_engine::oauth::{OAuthRefreshAcquirer, PasswordGrantAcquirer, StaticTokenAcquirer};
use nocturne_engine::{
    AuthTokenManager, ConnectorAdapter, RetryDelayStrategy, SyncContext, TokenAcquirer,
};
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Record fields probed, in order, for the record's own timestamp
const TIMESTAMP_FIELDS: [&str; 3] = ["date", "timestamp", "created_at"];

/// Connector for configuration-described JSON feeds
pub struct JsonFeedConnector {
    connector_id: String,
    client: Client,
    tokens: Arc<AuthTokenManager>,
    strategy: Arc<dyn RetryDelayStrategy>,
    max_retries: u32,
    timezone_offset: chrono::Duration,
}

impl JsonFeedConnector {
    /// Build a connector, choosing the login flow from the credentials
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` when no usable credential set is present.
    pub fn from_config(
        config: &ConnectorConfiguration,
        client: Client,
        strategy: Arc<dyn RetryDelayStrategy>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConnectorError> {
        let acquirer = select_acquirer(config, &client)?;
        let tokens = AuthTokenManager::new(
            config.connector_id.clone(),
            acquirer,
            Arc::clone(&strategy),
            config.max_retry_attempts,
            config.token_lifetime_buffer(),
        )
        .with_shutdown(shutdown);
        Ok(Self::new(config, client, Arc::new(tokens), strategy))
    }

    /// Build with an existing token manager
    pub fn new(
        config: &ConnectorConfiguration,
        client: Client,
        tokens: Arc<AuthTokenManager>,
        strategy: Arc<dyn RetryDelayStrategy>,
    ) -> Self {
        Self {
            connector_id: config.connector_id.clone(),
            client,
            tokens,
            strategy,
            max_retries: config.max_retry_attempts,
            timezone_offset: config.timezone_offset_duration(),
        }
    }

    /// Token manager shared by every request of this connector
    #[must_use]
    pub fn tokens(&self) -> &Arc<AuthTokenManager> {
        &self.tokens
    }

    async fn fetch_feed(
        &self,
        url: &str,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, ConnectorError> {
        let query = [("since", since.to_rfc3339())];
        let body = get_json_authorized(
            &self.client,
            url,
            &query,
            &self.tokens,
            self.strategy.as_ref(),
            self.max_retries,
            cancel,
        )
        .await?;

        match body {
            Value::Array(records) => Ok(records),
            other => Err(ConnectorError::MalformedResponse(format!(
                "expected a JSON array from {url}, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Newest record timestamp, reading naive timestamps as provider-local time
    fn latest_timestamp(&self, records: &[Value]) -> Option<DateTime<Utc>> {
        records
            .iter()
            .filter_map(|record| record_timestamp(record, self.timezone_offset))
            .max()
    }
}

#[async_trait]
impl ConnectorAdapter for JsonFeedConnector {
    fn connector_id(&self) -> &str {
        &self.connector_id
    }

    fn validate_configuration(&self, config: &ConnectorConfiguration) -> Result<(), ConnectorError> {
        let base_url = config
            .endpoints
            .base_url
            .as_deref()
            .ok_or_else(|| ConnectorError::Configuration("missing BASE_URL".into()))?;
        url::Url::parse(base_url)
            .map_err(|e| ConnectorError::Configuration(format!("invalid BASE_URL: {e}")))?;
        if config.endpoints.feeds.is_empty() {
            return Err(ConnectorError::Configuration(
                "no FEED_<TYPE> paths configured".into(),
            ));
        }
        Ok(())
    }

    async fn execute_sync(
        &self,
        backfill_from: Option<DateTime<Utc>>,
        ctx: &SyncContext,
        cancel: &CancellationToken,
    ) -> Result<SyncCycleResult, ConnectorError> {
        let base_url = ctx
            .config
            .endpoints
            .base_url
            .as_deref()
            .ok_or_else(|| ConnectorError::Configuration("missing BASE_URL".into()))?
            .trim_end_matches('/');
        if let Some(from) = backfill_from {
            info!(connector = %self.connector_id, from = %from, "reconciling outage window");
        }

        let mut result = ctx.begin_result();
        for (data_type, path) in &ctx.config.endpoints.feeds {
            let url = format!("{base_url}{path}");
            let records = self.fetch_feed(&url, ctx.since, cancel).await?;
            let latest = self.latest_timestamp(&records);
            let submitted = ctx.submit(*data_type, &records, cancel).await?;
            debug!(
                connector = %self.connector_id,
                data_type = %data_type,
                fetched = records.len(),
                submitted,
                "feed synchronized"
            );
            result.record_items(*data_type, submitted, latest);
        }
        Ok(result)
    }
}

fn select_acquirer(
    config: &ConnectorConfiguration,
    client: &Client,
) -> Result<Arc<dyn TokenAcquirer>, ConnectorError> {
    let credentials = &config.credentials;
    if let Some(key) = credentials.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Ok(Arc::new(StaticTokenAcquirer::new(key)));
    }
    if credentials.refresh_token.is_some() {
        return Ok(Arc::new(OAuthRefreshAcquirer::from_config(
            config,
            client.clone(),
        )?));
    }
    if credentials.username.is_some() {
        return Ok(Arc::new(PasswordGrantAcquirer::from_config(
            config,
            client.clone(),
        )?));
    }
    Err(ConnectorError::Configuration(format!(
        "connector {} needs API_KEY, REFRESH_TOKEN, or USERNAME/PASSWORD",
        config.connector_id
    )))
}

/// Timestamp of one record
///
/// Accepts epoch milliseconds, RFC 3339 strings, and zone-less `YYYY-MM-DDTHH:MM:SS`
/// strings, which are shifted from provider-local time by `offset`.
#[must_use]
pub fn record_timestamp(record: &Value, offset: chrono::Duration) -> Option<DateTime<Utc>> {
    TIMESTAMP_FIELDS
        .iter()
        .filter_map(|field| record.get(field))
        .find_map(|value| match value {
            Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc() - offset)
                }),
            _ => None,
        })
}

/// Feed paths keyed by data type, for logging
#[must_use]
pub fn describe_feeds(config: &ConnectorConfiguration) -> BTreeMap<String, String> {
    config
        .endpoints
        .feeds
        .iter()
        .map(|(data_type, path)| (data_type.as_str().to_owned(), path.clone()))
        .collect()
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nocturne_core::models::{ConnectorCredentials, ConnectorEndpoints};
    use serde_json::json;

    #[test]
    fn test_record_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
        let zero = chrono::Duration::zero();

        let millis = json!({ "date": expected.timestamp_millis() });
        assert_eq!(record_timestamp(&millis, zero), Some(expected));

        let rfc = json!({ "timestamp": "2025-04-01T10:00:00+02:00" });
        assert_eq!(record_timestamp(&rfc, zero), Some(expected));

        let local = json!({ "created_at": "2025-04-01T10:00:00" });
        assert_eq!(record_timestamp(&local, chrono::Duration::hours(2)), Some(expected));

        assert_eq!(record_timestamp(&json!({ "value": 120 }), zero), None);
    }

    #[test]
    fn test_acquirer_requires_some_credential() {
        let config = ConnectorConfiguration::new("feed");
        assert!(matches!(
            select_acquirer(&config, &Client::new()),
            Err(ConnectorError::Configuration(_))
        ));

        let with_key = ConnectorConfiguration::new("feed").with_credentials(ConnectorCredentials {
            api_key: Some("k".into()),
            ..ConnectorCredentials::default()
        });
        assert!(select_acquirer(&with_key, &Client::new()).is_ok());
    }

    #[test]
    fn test_validation_requires_base_url_and_feeds() {
        let config = ConnectorConfiguration::new("feed").with_credentials(ConnectorCredentials {
            api_key: Some("k".into()),
            ..ConnectorCredentials::default()
        });
        let connector = JsonFeedConnector::from_config(
            &config,
            Client::new(),
            Arc::new(nocturne_engine::FixedDelay(std::time::Duration::ZERO)),
            CancellationToken::new(),
        )
        .unwrap();
        assert!(connector.validate_configuration(&config).is_err());

        let mut feeds = BTreeMap::new();
        feeds.insert(DataType::Glucose, "/entries".to_owned());
        let complete = config.with_endpoints(ConnectorEndpoints {
            base_url: Some("https://provider.example".into()),
            token_url: None,
            feeds,
        });
        assert!(connector.validate_configuration(&complete).is_ok());
        assert_eq!(
            describe_feeds(&complete).get("glucose").map(String::as_str),
            Some("/entries")
        );
    }
}
