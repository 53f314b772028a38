// ABOUTME: Lock-light in-memory connector metrics read by health checks
// ABOUTME: Atomic counters, CAS watermark updates, and lazily pruned hourly buckets
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nocturne Contributors

//! # Metrics
//!
//! [`MetricsTracker`] keeps per-field atomics rather than a single lock so one tracker
//! can be fed concurrently by several connector workers. The 24-hour rate is kept in
//! hourly buckets keyed by hours since the Unix epoch; buckets older than the window are
//! dropped on every read and write, so no background timer is needed.

use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use nocturne_core::constants::limits;
use nocturne_core::models::MetricsSnapshot;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Sentinel for "no timestamp recorded"
const UNSET: i64 = i64::MIN;

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Thread-safe counters for one connector (or a group sharing one tracker)
pub struct MetricsTracker {
    clock: Arc<dyn Clock>,
    total_entries: AtomicU64,
    last_entry_ms: AtomicI64,
    last_sync_ms: AtomicI64,
    hourly: DashMap<i64, AtomicU64>,
    recent: Mutex<VecDeque<DateTime<Utc>>>,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsTracker {
    /// Tracker using the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Tracker using `clock` for bucket keys and sync times
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            total_entries: AtomicU64::new(0),
            last_entry_ms: AtomicI64::new(UNSET),
            last_sync_ms: AtomicI64::new(UNSET),
            hourly: DashMap::new(),
            recent: Mutex::new(VecDeque::with_capacity(limits::RECENT_TIMESTAMPS_CAPACITY)),
        }
    }

    /// Record `count` new entries whose newest timestamp is `latest`
    pub fn track_entries(&self, count: u64, latest: Option<DateTime<Utc>>) {
        self.total_entries.fetch_add(count, Ordering::Relaxed);

        if let Some(latest) = latest {
            advance_watermark(&self.last_entry_ms, latest.timestamp_millis());
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() == limits::RECENT_TIMESTAMPS_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(latest);
        }

        let now_hour = hour_key(self.clock.now());
        if count > 0 {
            self.hourly
                .entry(now_hour)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(count, Ordering::Relaxed);
        }
        self.prune(now_hour);
    }

    /// Record a successful sync completing now
    pub fn track_sync(&self) {
        self.track_sync_at(self.clock.now());
    }

    /// Record a successful sync completing at `at`
    pub fn track_sync_at(&self, at: DateTime<Utc>) {
        advance_watermark(&self.last_sync_ms, at.timestamp_millis());
    }

    /// Entries tracked during the trailing 24 hours
    #[must_use]
    pub fn entries_last_24_hours(&self) -> u64 {
        self.prune(hour_key(self.clock.now()));
        self.hourly
            .iter()
            .map(|bucket| bucket.value().load(Ordering::Relaxed))
            .sum()
    }

    /// Entries tracked since creation or the last reset
    #[must_use]
    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::Relaxed)
    }

    /// Newest entry timestamp ever tracked
    #[must_use]
    pub fn last_entry_time(&self) -> Option<DateTime<Utc>> {
        load_time(&self.last_entry_ms)
    }

    /// Last recorded successful sync
    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        load_time(&self.last_sync_ms)
    }

    /// Most recent entry timestamps, oldest first
    #[must_use]
    pub fn recent_entry_timestamps(&self) -> Vec<DateTime<Utc>> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Point-in-time copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_entries: self.total_entries(),
            last_entry_time: self.last_entry_time(),
            entries_last_24_hours: self.entries_last_24_hours(),
            last_sync_time: self.last_sync_time(),
            recent_entry_timestamps: self.recent_entry_timestamps(),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.total_entries.store(0, Ordering::Relaxed);
        self.last_entry_ms.store(UNSET, Ordering::Relaxed);
        self.last_sync_ms.store(UNSET, Ordering::Relaxed);
        self.hourly.clear();
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("metrics reset");
    }

    fn prune(&self, now_hour: i64) {
        let cutoff = now_hour - limits::ENTRY_RATE_WINDOW_HOURS;
        self.hourly.retain(|hour, _| *hour >= cutoff);
    }
}

/// Raise `cell` to `candidate` unless it already holds a later value
fn advance_watermark(cell: &AtomicI64, candidate: i64) {
    let mut current = cell.load(Ordering::Acquire);
    while candidate > current {
        match cell.compare_exchange_weak(current, candidate, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

fn load_time(cell: &AtomicI64) -> Option<DateTime<Utc>> {
    match cell.load(Ordering::Acquire) {
        UNSET => None,
        millis => Utc.timestamp_millis_opt(millis).single(),
    }
}

fn hour_key(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis().div_euclid(MILLIS_PER_HOUR)
}

/// Trackers keyed by connector id
#[derive(Default)]
pub struct MetricsRegistry {
    clock: Option<Arc<dyn Clock>>,
    trackers: DashMap<String, Arc<MetricsTracker>>,
}

impl MetricsRegistry {
    /// Registry whose trackers use the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose trackers use `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock: Some(clock),
            trackers: DashMap::new(),
        }
    }

    /// Tracker for `connector_id`, created on first use
    #[must_use]
    pub fn tracker(&self, connector_id: &str) -> Arc<MetricsTracker> {
        if let Some(existing) = self.trackers.get(connector_id) {
            return Arc::clone(existing.value());
        }
        let tracker = self.trackers.entry(connector_id.to_owned()).or_insert_with(|| {
            Arc::new(
                self.clock
                    .as_ref()
                    .map_or_else(MetricsTracker::new, |c| MetricsTracker::with_clock(Arc::clone(c))),
            )
        });
        Arc::clone(tracker.value())
    }

    /// Snapshot of every registered tracker, ordered by connector id
    #[must_use]
    pub fn snapshots(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.trackers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Reset one connector's counters; returns false for unknown ids
    pub fn reset(&self, connector_id: &str) -> bool {
        self.trackers
            .get(connector_id)
            .map(|tracker| tracker.reset())
            .is_some()
    }
}
