// ABOUTME: Core types and constants for the Nocturne connector synchronization engine
// ABOUTME: Foundation crate with error handling, retry classification, models, and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

#![deny(unsafe_code)]

//! # Nocturne Core
//!
//! Foundation crate shared by the connector engine and the host service. It is
//! designed to change infrequently so the heavier crates compile incrementally.
//!
//! ## Modules
//!
//! - **errors**: `AppError`/`ErrorCode` plus `ConnectorError` with retry classification
//! - **constants**: environment variable names, defaults, and clamping limits
//! - **models**: connector state, sync cycle results, tokens, and metrics snapshots

/// Unified error handling with error codes and connector error classification
pub mod errors;

/// Application constants organized by domain
pub mod constants;

/// Shared data models for connectors
pub mod models;
