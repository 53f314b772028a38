// ABOUTME: Shared HTTP client with per-request timeouts and status classification helpers
// ABOUTME: Authorized GETs run through the shared retry policy and invalidate tokens on 401
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use crate::retry::{execute_with_retry, RetryDelayStrategy};
use crate::token::AuthTokenManager;
use nocturne_core::constants::http;
use nocturne_core::errors::ConnectorError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, ClientBuilder, Response};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Timeouts recorded before the shared client is first built
static CLIENT_TIMEOUTS: OnceLock<(u64, u64)> = OnceLock::new();

static SHARED_CLIENT: OnceLock<Client> = OnceLock::new();

/// Configure the shared client's timeouts
///
/// Call once at startup, before any connector builds requests. Later calls are ignored.
pub fn initialize_shared_client(timeout_secs: u64, connect_timeout_secs: u64) {
    let _ = CLIENT_TIMEOUTS.set((timeout_secs, connect_timeout_secs));
}

/// Pooled client shared by every connector
///
/// Falls back to 30s request / 10s connect timeouts when
/// [`initialize_shared_client`] was never called.
pub fn shared_client() -> &'static Client {
    SHARED_CLIENT.get_or_init(|| {
        let (timeout, connect_timeout) = CLIENT_TIMEOUTS
            .get()
            .copied()
            .unwrap_or((http::DEFAULT_TIMEOUT_SECS, http::DEFAULT_CONNECT_TIMEOUT_SECS));

        ClientBuilder::new()
            .timeout(Duration::from_secs(timeout))
            .connect_timeout(Duration::from_secs(connect_timeout))
            .user_agent(http::USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Pass successful responses through; classify everything else
///
/// 429 responses carry the `Retry-After` hint (seconds form) when present.
///
/// # Errors
///
/// Returns the `ConnectorError` matching the status code.
pub async fn check_status(response: Response) -> Result<Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    let mut error = ConnectorError::from_status(status.as_u16(), body);
    if let ConnectorError::RateLimited { retry_after_secs } = &mut error {
        *retry_after_secs = retry_after;
    }
    Err(error)
}

/// GET a JSON document with the connector's managed bearer token
///
/// Retryable failures follow `strategy`. A 401/403 drops the cached token so the next
/// cycle logs in again, and fails this call without further retries.
///
/// # Errors
///
/// Returns the classified failure, `ConnectorError::TokenUnavailable` when no token
/// could be acquired, or `ConnectorError::Cancelled`.
pub async fn get_json_authorized(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    tokens: &AuthTokenManager,
    strategy: &dyn RetryDelayStrategy,
    max_retries: u32,
    cancel: &CancellationToken,
) -> Result<Value, ConnectorError> {
    let operation = format!("GET {url}");
    execute_with_retry(
        |attempt| async move {
            let token = tokens.get_token(cancel).await?;
            debug!(url, attempt, "fetching feed");
            let response = client
                .get(url)
                .query(query)
                .bearer_auth(&token.value)
                .send()
                .await?;
            match check_status(response).await {
                Ok(response) => Ok(response.json::<Value>().await?),
                Err(e) => {
                    if e.is_auth_rejection() {
                        tokens.invalidate().await;
                    }
                    Err(e)
                }
            }
        },
        strategy,
        max_retries,
        &operation,
        cancel,
    )
    .await
}
