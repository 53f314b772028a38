// ABOUTME: Structured error types for data-source connector operations
// ABOUTME: Classifies failures as retryable (5xx, 429, network, timeout) or terminal for a cycle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while talking to an external data provider or downstream API
///
/// Every variant is cheap to clone so that a single failed token acquisition can be
/// shared with every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorError {
    /// Connection failure, DNS failure, reset, etc.
    #[error("network error: {0}")]
    Network(String),

    /// Request did not complete within its own timeout
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured timeout
        timeout_secs: u64,
    },

    /// Provider answered with a non-success status that has no dedicated variant
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Provider throttled us (HTTP 429)
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Provider `Retry-After` hint in seconds, if any
        retry_after_secs: Option<u64>,
    },

    /// Provider rejected the credentials (HTTP 401/403)
    #[error("authentication rejected (HTTP {status}): {message}")]
    AuthRejected {
        /// HTTP status code
        status: u16,
        /// Provider message
        message: String,
    },

    /// Response body could not be parsed
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// No valid bearer token could be produced for this cycle
    #[error("no valid token: {reason}")]
    TokenUnavailable {
        /// Why acquisition failed
        reason: String,
    },

    /// Downstream data submission failed
    #[error("submission failed: {message}")]
    Submission {
        /// Downstream HTTP status, if the request reached the server
        status: Option<u16>,
        /// Failure description
        message: String,
    },

    /// Missing or invalid connector configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Durable state could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    /// Host shutdown was observed while the operation was suspended
    #[error("operation cancelled")]
    Cancelled,

    /// Every retry attempt failed with a retryable error
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Operation name
        operation: String,
        /// Attempts made (initial call included)
        attempts: u32,
        /// Error from the final attempt
        last_error: Box<ConnectorError>,
    },
}

impl ConnectorError {
    /// Build the appropriate variant for a non-success HTTP status
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = truncate_body(body.into());
        match status {
            401 | 403 => Self::AuthRejected {
                status,
                message: body,
            },
            429 => Self::RateLimited {
                retry_after_secs: None,
            },
            _ => Self::HttpStatus { status, body },
        }
    }

    /// Whether another attempt of the same request may succeed
    ///
    /// Retryable: network failures, timeouts, HTTP 5xx, HTTP 408 and HTTP 429.
    /// Terminal for the current cycle: 4xx auth rejections, other 4xx, malformed bodies,
    /// configuration and storage problems, cancellation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::HttpStatus { status, .. } => is_retryable_status(*status),
            Self::Submission { status, .. } => status.is_none_or(is_retryable_status),
            Self::AuthRejected { .. }
            | Self::MalformedResponse(_)
            | Self::TokenUnavailable { .. }
            | Self::Configuration(_)
            | Self::Storage(_)
            | Self::Cancelled
            | Self::RetriesExhausted { .. } => false,
        }
    }

    /// Whether the provider explicitly rejected our credentials
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }

    /// Provider-supplied minimum wait before the next attempt
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

const fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

const MAX_BODY_CHARS: usize = 512;

fn truncate_body(body: String) -> String {
    if body.chars().count() <= MAX_BODY_CHARS {
        return body;
    }
    let mut truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
    truncated.push('…');
    truncated
}

#[cfg(feature = "http-errors")]
impl From<reqwest::Error> for ConnectorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout {
                operation: error
                    .url()
                    .map_or_else(|| "request".to_owned(), |u| u.path().to_owned()),
                timeout_secs: 0,
            };
        }
        if error.is_decode() {
            return Self::MalformedResponse(error.to_string());
        }
        if let Some(status) = error.status() {
            return Self::from_status(status.as_u16(), error.to_string());
        }
        Self::Network(error.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(error: serde_json::Error) -> Self {
        Self::MalformedResponse(error.to_string())
    }
}

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;
