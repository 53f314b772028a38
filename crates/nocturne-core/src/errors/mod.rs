// ABOUTME: Unified error handling system with error codes for the connector service
// ABOUTME: Defines AppError, ErrorCode, and the AppResult alias used across crates
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! # Unified Error Handling System
//!
//! `AppError` is the error type returned by host-level operations (configuration,
//! storage, startup). Per-request failures against external providers use
//! [`connector::ConnectorError`], which carries the retry classification.

/// Connector errors with retryable / non-retryable classification
pub mod connector;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use connector::{ConnectorError, ConnectorResult};

/// Standard error codes used throughout the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Configuration (1000-1999)
    #[serde(rename = "CONFIG_MISSING")]
    ConfigMissing = 1001,
    #[serde(rename = "CONFIG_INVALID")]
    ConfigInvalid = 1002,

    // External Services (5000-5999)
    #[serde(rename = "EXTERNAL_SERVICE_ERROR")]
    ExternalServiceError = 5000,

    // Internal Errors (9000-9999)
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError = 9000,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError = 9001,
}

impl ErrorCode {
    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ConfigMissing => "Required configuration is missing",
            Self::ConfigInvalid => "Configuration is invalid",
            Self::ExternalServiceError => "An external service encountered an error",
            Self::InternalError => "An internal error occurred",
            Self::DatabaseError => "Database operation failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Unified error type for host-level operations
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// A required configuration value is absent
    pub fn config_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigMissing, message)
    }

    /// A configuration value is present but unusable
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message)
    }

    /// Database operation failed
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Internal invariant violated
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl From<ConnectorError> for AppError {
    fn from(error: ConnectorError) -> Self {
        // Retry classification stays on `ConnectorError`; only the category survives here
        let code = match &error {
            ConnectorError::Configuration(_) => ErrorCode::ConfigInvalid,
            ConnectorError::Storage(_) => ErrorCode::DatabaseError,
            _ => ErrorCode::ExternalServiceError,
        };
        Self::new(code, error.to_string()).with_source(error)
    }
}

#[cfg(feature = "database-errors")]
impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::database(format!("Database error: {error}")).with_source(error)
    }
}

/// Result type alias using `AppError`
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_errors_keep_their_category() {
        let invalid = AppError::from(ConnectorError::Configuration("no login flow".into()));
        assert_eq!(invalid.code, ErrorCode::ConfigInvalid);
        assert!(invalid.message.contains("no login flow"));
        assert!(std::error::Error::source(&invalid).is_some());

        let storage = AppError::from(ConnectorError::Storage("disk full".into()));
        assert_eq!(storage.code, ErrorCode::DatabaseError);

        let upstream = AppError::from(ConnectorError::Network("connection reset".into()));
        assert_eq!(upstream.code, ErrorCode::ExternalServiceError);
    }

    #[test]
    fn test_codes_serialize_with_stable_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ConfigMissing).unwrap(),
            "\"CONFIG_MISSING\""
        );
        assert_eq!(ErrorCode::DatabaseError.to_string(), "Database operation failed");
    }
}
