// ABOUTME: HTTP data submitter posting normalized records to the Nocturne data API
// ABOUTME: Authenticates with the hashed API secret and retries transient failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use crate::config::SubmissionConfig;
use async_trait::async_trait;
use nocturne_core::constants::endpoints;
use nocturne_core::errors::{AppError, AppResult, ConnectorError};
use nocturne_core::models::DataType;
use nocturne_engine::http_client::check_status;
use nocturne_engine::{
    execute_with_retry, DataSubmitter, DiscardingSubmitter, MemorySubmitter, RetryDelayStrategy,
};
use reqwest::Client;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Header carrying the hashed API secret
pub const API_SECRET_HEADER: &str = "api-secret";

/// Hex SHA-256 of the API secret, as the data API expects it
#[must_use]
pub fn hash_api_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Where a host run sends its records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// POST to the data API
    Http,
    /// Keep every batch in memory; bounded by a single pass over the connectors
    Memory,
    /// Count and drop records
    Discard,
}

impl SubmissionMode {
    /// Pick the sink for a run
    ///
    /// Without a data API (or with `dry_run`), `--once` runs keep records in memory and
    /// long-running hosts drop them.
    #[must_use]
    pub fn select(config: &SubmissionConfig, dry_run: bool, once: bool) -> Self {
        match (dry_run || config.api_url.is_none(), once) {
            (false, _) => Self::Http,
            (true, true) => Self::Memory,
            (true, false) => Self::Discard,
        }
    }
}

/// Build the submitter for `mode`
///
/// # Errors
///
/// Returns a configuration error when `mode` is [`SubmissionMode::Http`] and the data API
/// URL is missing or invalid.
pub fn build_submitter(
    mode: SubmissionMode,
    config: &SubmissionConfig,
    client: Client,
    strategy: Arc<dyn RetryDelayStrategy>,
    max_retries: u32,
) -> AppResult<Arc<dyn DataSubmitter>> {
    Ok(match mode {
        SubmissionMode::Http => Arc::new(HttpDataSubmitter::from_config(
            config,
            client,
            strategy,
            max_retries,
        )?),
        SubmissionMode::Memory => {
            warn!("no data API configured or --dry-run given, records stay in memory");
            Arc::new(MemorySubmitter::new())
        }
        SubmissionMode::Discard => {
            warn!("no data API configured or --dry-run given, records are counted and dropped");
            Arc::new(DiscardingSubmitter::new())
        }
    })
}

/// Posts record batches to `{api_url}/api/v1/{collection}`
pub struct HttpDataSubmitter {
    client: Client,
    api_url: String,
    secret_hash: Option<String>,
    strategy: Arc<dyn RetryDelayStrategy>,
    max_retries: u32,
}

impl HttpDataSubmitter {
    /// Build from the host submission settings
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `NOCTURNE_API_URL` is unset or not a URL.
    pub fn from_config(
        config: &SubmissionConfig,
        client: Client,
        strategy: Arc<dyn RetryDelayStrategy>,
        max_retries: u32,
    ) -> AppResult<Self> {
        let api_url = config
            .api_url
            .as_deref()
            .ok_or_else(|| AppError::config_missing("NOCTURNE_API_URL is required for submission"))?;
        url::Url::parse(api_url)
            .map_err(|e| AppError::config_invalid(format!("Invalid NOCTURNE_API_URL: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_owned(),
            secret_hash: config.api_secret.as_deref().map(hash_api_secret),
            strategy,
            max_retries,
        })
    }

    /// Endpoint for a data type's collection
    #[must_use]
    pub fn collection_url(&self, data_type: DataType) -> String {
        format!(
            "{}{}/{}",
            self.api_url,
            endpoints::DATA_API_PREFIX,
            data_type.collection()
        )
    }

    async fn post_once(&self, url: &str, records: &[Value]) -> Result<(), ConnectorError> {
        let mut request = self.client.post(url).json(records);
        if let Some(hash) = &self.secret_hash {
            request = request.header(API_SECRET_HEADER, hash);
        }
        let response = request.send().await?;
        check_status(response).await.map(drop).map_err(into_submission_error)
    }
}

#[async_trait]
impl DataSubmitter for HttpDataSubmitter {
    async fn submit(
        &self,
        connector_id: &str,
        data_type: DataType,
        records: &[Value],
        cancel: &CancellationToken,
    ) -> Result<usize, ConnectorError> {
        if records.is_empty() {
            return Ok(0);
        }
        let url = self.collection_url(data_type);
        let operation = format!("POST {url}");

        execute_with_retry(
            |_| self.post_once(&url, records),
            self.strategy.as_ref(),
            self.max_retries,
            &operation,
            cancel,
        )
        .await?;

        debug!(
            connector = connector_id,
            data_type = %data_type,
            count = records.len(),
            "records submitted"
        );
        Ok(records.len())
    }
}

/// Downstream rejections become `Submission` errors; throttling and transport
/// failures keep their own (retryable) variants
fn into_submission_error(error: ConnectorError) -> ConnectorError {
    match error {
        ConnectorError::HttpStatus { status, body } => ConnectorError::Submission {
            status: Some(status),
            message: body,
        },
        ConnectorError::AuthRejected { status, message } => ConnectorError::Submission {
            status: Some(status),
            message: format!("data API rejected the API secret: {message}"),
        },
        other => other,
    }
}
