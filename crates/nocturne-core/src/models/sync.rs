// ABOUTME: Sync checkpoint, per-cycle result, data type, and metrics snapshot models
// ABOUTME: ConnectorState only ever advances its last-successful-sync watermark
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of record a connector produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// CGM sensor glucose values
    Glucose,
    /// Boluses, carbs, temp basals
    Treatments,
    /// Pump and uploader status
    DeviceStatus,
    /// Nutrition entries
    Food,
    /// Exercise and activity
    Activity,
    /// Therapy profile
    Profile,
}

impl DataType {
    /// Every data type, in submission order
    pub const ALL: [Self; 6] = [
        Self::Glucose,
        Self::Treatments,
        Self::DeviceStatus,
        Self::Food,
        Self::Activity,
        Self::Profile,
    ];

    /// Downstream collection name
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Glucose => "entries",
            Self::Treatments => "treatments",
            Self::DeviceStatus => "devicestatus",
            Self::Food => "food",
            Self::Activity => "activity",
            Self::Profile => "profile",
        }
    }

    /// Name used in configuration keys and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Glucose => "glucose",
            Self::Treatments => "treatments",
            Self::DeviceStatus => "device_status",
            Self::Food => "food",
            Self::Activity => "activity",
            Self::Profile => "profile",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "glucose" | "entries" | "sgv" => Ok(Self::Glucose),
            "treatments" => Ok(Self::Treatments),
            "device_status" | "devicestatus" => Ok(Self::DeviceStatus),
            "food" => Ok(Self::Food),
            "activity" => Ok(Self::Activity),
            "profile" => Ok(Self::Profile),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

/// Durable sync checkpoint for one connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorState {
    /// Connector identifier
    pub connector_id: String,
    /// Completion time of the last successful cycle
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    /// Failed cycles since the last success
    pub consecutive_failure_count: u32,
}

impl ConnectorState {
    /// Fresh state for a connector that never synced
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            last_successful_sync_at: None,
            consecutive_failure_count: 0,
        }
    }

    /// State after a successful cycle completing at `at`
    ///
    /// The watermark never moves backwards, even if `at` is older than the stored value.
    #[must_use]
    pub fn after_success(&self, at: DateTime<Utc>) -> Self {
        Self {
            connector_id: self.connector_id.clone(),
            last_successful_sync_at: Some(
                self.last_successful_sync_at.map_or(at, |prev| prev.max(at)),
            ),
            consecutive_failure_count: 0,
        }
    }

    /// State after a failed cycle
    #[must_use]
    pub fn after_failure(&self) -> Self {
        Self {
            connector_id: self.connector_id.clone(),
            last_successful_sync_at: self.last_successful_sync_at,
            consecutive_failure_count: self.consecutive_failure_count.saturating_add(1),
        }
    }

    /// Merge an incoming state into this stored one, keeping the watermark monotonic
    #[must_use]
    pub fn merged_with(&self, incoming: &Self) -> Self {
        let last_successful_sync_at = match (self.last_successful_sync_at, incoming.last_successful_sync_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Self {
            connector_id: incoming.connector_id.clone(),
            last_successful_sync_at,
            consecutive_failure_count: incoming.consecutive_failure_count,
        }
    }
}

/// Outcome of one sync cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCycleResult {
    /// Unique id for log correlation
    pub cycle_id: Uuid,
    /// Connector that ran the cycle
    pub connector_id: String,
    /// True when the cycle completed without an unrecoverable error
    pub success: bool,
    /// Records submitted per data type
    pub items: BTreeMap<DataType, usize>,
    /// Newest record timestamp seen in this cycle
    pub latest_record_at: Option<DateTime<Utc>>,
    /// Failure description
    pub error: Option<String>,
    /// Cycle start
    pub started_at: DateTime<Utc>,
    /// Cycle end
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncCycleResult {
    /// Begin a cycle at `started_at`
    pub fn started(connector_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            connector_id: connector_id.into(),
            success: false,
            items: BTreeMap::new(),
            latest_record_at: None,
            error: None,
            started_at,
            finished_at: None,
        }
    }

    /// Add submitted records of `data_type`, advancing the newest-record watermark
    pub fn record_items(
        &mut self,
        data_type: DataType,
        count: usize,
        latest: Option<DateTime<Utc>>,
    ) {
        *self.items.entry(data_type).or_default() += count;
        if let Some(latest) = latest {
            self.latest_record_at = Some(self.latest_record_at.map_or(latest, |l| l.max(latest)));
        }
    }

    /// Mark the cycle successful
    #[must_use]
    pub fn succeeded(mut self, finished_at: DateTime<Utc>) -> Self {
        self.success = true;
        self.error = None;
        self.finished_at = Some(finished_at);
        self
    }

    /// Mark the cycle failed
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>, finished_at: DateTime<Utc>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.finished_at = Some(finished_at);
        self
    }

    /// Records submitted across every data type
    #[must_use]
    pub fn total_items(&self) -> usize {
        self.items.values().sum()
    }

    /// Wall-clock duration, once finished
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

/// Read-only view of a connector's metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Records tracked since start or last reset
    pub total_entries: u64,
    /// Newest record timestamp ever tracked
    pub last_entry_time: Option<DateTime<Utc>>,
    /// Records tracked during the trailing 24 hours
    pub entries_last_24_hours: u64,
    /// Last successful cycle completion
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Most recent record timestamps, oldest first
    pub recent_entry_timestamps: Vec<DateTime<Utc>>,
}
