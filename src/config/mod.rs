// ABOUTME: Configuration module for the connector service
// ABOUTME: Environment-only settings for the host and per-connector blocks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

/// Environment and connector configuration
pub mod environment;

pub use environment::{
    connector_env_key, load_connector, DatabaseUrl, Environment, HttpClientConfig, ServerConfig,
    SubmissionConfig,
};
