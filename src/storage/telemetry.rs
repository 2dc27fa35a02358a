use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};

use chrono::Utc;
use serde::Serialize;

/// Backend resource a telemetry record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Resource {
    /// Split changes.
    Splits,
    /// Segment changes.
    Segments,
    /// Impressions.
    Impressions,
    /// Impression counts.
    ImpressionCounts,
    /// Events.
    Events,
    /// Unique keys.
    UniqueKeys,
    /// Telemetry itself.
    Telemetry,
}

/// Snapshot of runtime counters, shipped periodically to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryStats {
    /// Impressions put on the queue.
    pub impressions_queued: u64,
    /// Impressions that were only counted.
    pub impressions_deduped: u64,
    /// Impressions dropped because the queue was full.
    pub impressions_dropped: u64,
    /// Events put on the queue.
    pub events_queued: u64,
    /// Events dropped because the queue was full.
    pub events_dropped: u64,
    /// Clients currently alive in the process.
    pub active_factories: u64,
    /// Count of non-2xx responses per resource and status code.
    pub http_errors: HashMap<Resource, HashMap<u16, u64>>,
    /// Time of the last successful request per resource, milliseconds since Unix epoch.
    pub last_synchronization: HashMap<Resource, i64>,
}

/// Thread-safe counters describing how the SDK runtime is doing.
#[derive(Default)]
pub struct TelemetryStorage {
    impressions_queued: AtomicU64,
    impressions_deduped: AtomicU64,
    impressions_dropped: AtomicU64,
    events_queued: AtomicU64,
    events_dropped: AtomicU64,
    active_factories: AtomicU64,
    http_errors: Mutex<HashMap<Resource, HashMap<u16, u64>>>,
    last_synchronization: Mutex<HashMap<Resource, i64>>,
}

impl TelemetryStorage {
    /// Create storage with every counter at zero.
    pub fn new() -> TelemetryStorage {
        TelemetryStorage::default()
    }

    /// Count the outcome of recording a batch of impressions.
    pub fn record_impressions(&self, queued: usize, deduped: usize, dropped: usize) {
        self.impressions_queued
            .fetch_add(queued as u64, Ordering::Relaxed);
        self.impressions_deduped
            .fetch_add(deduped as u64, Ordering::Relaxed);
        self.impressions_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// Count the outcome of tracking events.
    pub fn record_events(&self, queued: usize, dropped: usize) {
        self.events_queued.fetch_add(queued as u64, Ordering::Relaxed);
        self.events_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// Set the number of clients alive in the process.
    pub fn record_active_factories(&self, count: u64) {
        self.active_factories.store(count, Ordering::Relaxed);
    }

    /// Count a non-2xx response to a request on `resource`.
    pub fn record_http_error(&self, resource: Resource, status: u16) {
        *lock(&self.http_errors)
            .entry(resource)
            .or_default()
            .entry(status)
            .or_default() += 1;
    }

    /// Remember that a request on `resource` succeeded just now.
    pub fn record_successful_sync(&self, resource: Resource) {
        lock(&self.last_synchronization).insert(resource, Utc::now().timestamp_millis());
    }

    /// Snapshot the counters and reset them. Last synchronization times are kept.
    pub fn pop_stats(&self) -> TelemetryStats {
        TelemetryStats {
            impressions_queued: self.impressions_queued.swap(0, Ordering::Relaxed),
            impressions_deduped: self.impressions_deduped.swap(0, Ordering::Relaxed),
            impressions_dropped: self.impressions_dropped.swap(0, Ordering::Relaxed),
            events_queued: self.events_queued.swap(0, Ordering::Relaxed),
            events_dropped: self.events_dropped.swap(0, Ordering::Relaxed),
            active_factories: self.active_factories.load(Ordering::Relaxed),
            http_errors: std::mem::take(&mut *lock(&self.http_errors)),
            last_synchronization: lock(&self.last_synchronization).clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}
