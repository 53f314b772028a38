// ABOUTME: Generic token acquirers for OAuth2 refresh-token, password-grant, and static API keys
// ABOUTME: Parses expires_in / expires_at token responses into AuthToken values
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use crate::clock::{Clock, SystemClock};
use crate::http_client::check_status;
use crate::token::TokenAcquirer;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use nocturne_core::constants::retry;
use nocturne_core::errors::ConnectorError;
use nocturne_core::models::{AuthToken, ConnectorConfiguration};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// Bearer value
    pub access_token: String,
    /// Rotated refresh token, if the provider issues one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Absolute expiry as a Unix timestamp
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl TokenResponse {
    /// Expiry instant: `expires_at`, else `now + expires_in`, else a one hour default
    #[must_use]
    pub fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            })
            .unwrap_or_else(|| now + chrono::Duration::seconds(retry::DEFAULT_TOKEN_LIFETIME_SECS))
    }

    fn into_token(self, now: DateTime<Utc>) -> Result<AuthToken, ConnectorError> {
        if self.access_token.trim().is_empty() {
            return Err(ConnectorError::MalformedResponse(
                "token response has an empty access_token".into(),
            ));
        }
        let expires_at = self.expiry(now);
        Ok(AuthToken::new(self.access_token, expires_at))
    }
}

async fn request_token(
    client: &Client,
    token_url: &str,
    params: &[(&str, &str)],
) -> Result<TokenResponse, ConnectorError> {
    let response = client.post(token_url).form(params).send().await?;
    let response = check_status(response).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

fn require_token_url(config: &ConnectorConfiguration) -> Result<String, ConnectorError> {
    config
        .endpoints
        .token_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ConnectorError::Configuration("missing endpoint: token_url".into()))
}

/// OAuth2 `refresh_token` grant; keeps rotated refresh tokens in memory
pub struct OAuthRefreshAcquirer {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
    refresh_token: Mutex<String>,
    clock: Arc<dyn Clock>,
}

impl OAuthRefreshAcquirer {
    /// Build from connector configuration
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` when the token URL, client id, or refresh
    /// token is missing.
    pub fn from_config(config: &ConnectorConfiguration, client: Client) -> Result<Self, ConnectorError> {
        let credentials = &config.credentials;
        Ok(Self {
            client,
            token_url: require_token_url(config)?,
            client_id: credentials.require_client_id()?.to_owned(),
            client_secret: credentials.client_secret.clone(),
            refresh_token: Mutex::new(credentials.require_refresh_token()?.to_owned()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` when converting `expires_in`
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl TokenAcquirer for OAuthRefreshAcquirer {
    async fn acquire_token(&self) -> Result<AuthToken, ConnectorError> {
        let mut refresh_token = self.refresh_token.lock().await;
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let response = request_token(&self.client, &self.token_url, &params).await?;
        if let Some(rotated) = response.refresh_token.clone() {
            if rotated != *refresh_token {
                info!("refresh token rotated by provider");
                *refresh_token = rotated;
            }
        }
        response.into_token(self.clock.now())
    }
}

/// OAuth2 resource-owner `password` grant
pub struct PasswordGrantAcquirer {
    client: Client,
    token_url: String,
    username: String,
    password: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    clock: Arc<dyn Clock>,
}

impl PasswordGrantAcquirer {
    /// Build from connector configuration
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Configuration` when the token URL, username, or password
    /// is missing.
    pub fn from_config(config: &ConnectorConfiguration, client: Client) -> Result<Self, ConnectorError> {
        let credentials = &config.credentials;
        Ok(Self {
            client,
            token_url: require_token_url(config)?,
            username: credentials.require_username()?.to_owned(),
            password: credentials.require_password()?.to_owned(),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` when converting `expires_in`
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl TokenAcquirer for PasswordGrantAcquirer {
    async fn acquire_token(&self) -> Result<AuthToken, ConnectorError> {
        let mut params = vec![
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        if let Some(id) = &self.client_id {
            params.push(("client_id", id.as_str()));
        }
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        request_token(&self.client, &self.token_url, &params)
            .await?
            .into_token(self.clock.now())
    }
}

/// Static API key presented as a bearer token that never expires
pub struct StaticTokenAcquirer {
    key: String,
}

impl StaticTokenAcquirer {
    /// Wrap `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl TokenAcquirer for StaticTokenAcquirer {
    async fn acquire_token(&self) -> Result<AuthToken, ConnectorError> {
        Ok(AuthToken::new(self.key.clone(), DateTime::<Utc>::MAX_UTC))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_expires_at_takes_precedence() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"abc","expires_in":60,"expires_at":1743501600}"#,
        )
        .unwrap();
        assert_eq!(
            response.expiry(now()),
            Utc.timestamp_opt(1_743_501_600, 0).unwrap()
        );
    }

    #[test]
    fn test_expires_in_is_relative_to_now() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":900}"#).unwrap();
        assert_eq!(response.expiry(now()), now() + chrono::Duration::minutes(15));
    }

    #[test]
    fn test_missing_expiry_defaults_to_one_hour() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(response.expiry(now()), now() + chrono::Duration::hours(1));
    }

    #[test]
    fn test_empty_access_token_is_malformed() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":" "}"#).unwrap();
        assert!(matches!(
            response.into_token(now()),
            Err(ConnectorError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_refresh_acquirer_requires_refresh_token() {
        let mut config = ConnectorConfiguration::new("oauth");
        config.endpoints.token_url = Some("https://example.invalid/token".into());
        config.credentials.client_id = Some("client".into());
        let result = OAuthRefreshAcquirer::from_config(&config, Client::new());
        assert!(matches!(result, Err(ConnectorError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_static_token_never_expires() {
        let token = StaticTokenAcquirer::new("key").acquire_token().await.unwrap();
        assert!(token.is_valid_for(Utc::now(), chrono::Duration::days(3_650)));
    }
}
