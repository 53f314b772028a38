// ABOUTME: Main library entry point for the Nocturne connector service
// ABOUTME: Hosts connector schedulers with durable state, data submission, and health endpoints
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

#![deny(unsafe_code)]

//! # Nocturne Connectors
//!
//! Keeps glucose, treatment, and device data flowing from third-party clouds into
//! Nocturne. Each configured connector gets its own polling scheduler from
//! `nocturne-engine`; this crate supplies the host pieces around it.
//!
//! ## Architecture
//!
//! - **Config**: environment-only host and per-connector settings
//! - **Database**: `SQLite` checkpoint store
//! - **Submission**: HTTP client for the Nocturne data API
//! - **Feeds**: generic JSON feed connector
//! - **Supervisor**: one scheduler task per connector, shared shutdown
//! - **Health**: `/health` and `/health/connectors`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nocturne_connectors::config::ServerConfig;
//! use nocturne_connectors::errors::AppResult;
//!
//! fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("{}", config.summary());
//!     Ok(())
//! }
//! ```

/// Environment configuration
pub mod config;

/// `SQLite` connector state store
pub mod database;

/// JSON feed connector
pub mod feeds;

/// Health endpoints
pub mod health;

/// Structured logging setup
pub mod logging;

/// Nocturne data API submitter
pub mod submission;

/// Scheduler supervision and shutdown
pub mod supervisor;

pub use nocturne_core::{constants, errors, models};
pub use nocturne_engine as engine;
