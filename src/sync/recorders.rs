use std::sync::Arc;

use super::Recorder;
use crate::{
    api::RecordSender,
    impressions::{ImpressionsCounter, UniqueKeysTracker},
    models::{ImpressionCount, UniqueKeys},
    storage::{TelemetryStats, TelemetryStorage},
    Result,
};

/// Ships hourly impression counts. Counts that fail to ship are dropped.
pub struct ImpressionCountSynchronizer {
    counter: Arc<ImpressionsCounter>,
    sender: Arc<dyn RecordSender<ImpressionCount>>,
}

impl ImpressionCountSynchronizer {
    /// Create a synchronizer shipping the counts of `counter`.
    pub fn new(
        counter: Arc<ImpressionsCounter>,
        sender: Arc<dyn RecordSender<ImpressionCount>>,
    ) -> ImpressionCountSynchronizer {
        ImpressionCountSynchronizer { counter, sender }
    }
}

impl Recorder for ImpressionCountSynchronizer {
    fn synchronize(&self) -> Result<()> {
        let counts = self.counter.pop_all();
        if counts.is_empty() {
            return Ok(());
        }
        self.sender.send(&counts).map_err(|err| {
            log::warn!(target: "splitsync", dropped = counts.len(); "dropping impression counts");
            err
        })
    }
}

/// Ships the keys tracked by [`UniqueKeysTracker`] in bulks of at most `bulk_size` keys.
pub struct UniqueKeysSynchronizer {
    tracker: Arc<UniqueKeysTracker>,
    sender: Arc<dyn RecordSender<UniqueKeys>>,
    bulk_size: usize,
}

impl UniqueKeysSynchronizer {
    /// Create a synchronizer shipping the keys of `tracker`, `bulk_size` keys at a time.
    pub fn new(
        tracker: Arc<UniqueKeysTracker>,
        sender: Arc<dyn RecordSender<UniqueKeys>>,
        bulk_size: usize,
    ) -> UniqueKeysSynchronizer {
        UniqueKeysSynchronizer {
            tracker,
            sender,
            bulk_size: bulk_size.max(1),
        }
    }

    /// The tracker being flushed.
    pub fn tracker(&self) -> &Arc<UniqueKeysTracker> {
        &self.tracker
    }
}

impl Recorder for UniqueKeysSynchronizer {
    fn synchronize(&self) -> Result<()> {
        let bulks = split_into_bulks(self.tracker.pop_all(), self.bulk_size);
        let total = bulks.len();
        for (index, bulk) in bulks.into_iter().enumerate() {
            if let Err(err) = self.sender.send(&bulk) {
                log::warn!(target: "splitsync", dropped_bulks = total - index; "dropping unique keys");
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Group per-feature keys so that no group holds more than `max_keys` keys. Features with more
/// keys than that are split over several groups.
fn split_into_bulks(unique_keys: Vec<UniqueKeys>, max_keys: usize) -> Vec<Vec<UniqueKeys>> {
    let mut bulks = Vec::new();
    let mut current = Vec::new();
    let mut current_keys = 0;

    for UniqueKeys { feature, mut keys } in unique_keys {
        while !keys.is_empty() {
            let room = max_keys - current_keys;
            let rest = keys.split_off(keys.len().min(room));
            current_keys += keys.len();
            current.push(UniqueKeys {
                feature: feature.clone(),
                keys,
            });
            keys = rest;

            if current_keys == max_keys {
                bulks.push(std::mem::take(&mut current));
                current_keys = 0;
            }
        }
    }
    if !current.is_empty() {
        bulks.push(current);
    }
    bulks
}

/// Ships snapshots of [`TelemetryStorage`].
pub struct TelemetrySynchronizer {
    storage: Arc<TelemetryStorage>,
    sender: Arc<dyn RecordSender<TelemetryStats>>,
}

impl TelemetrySynchronizer {
    /// Create a synchronizer shipping snapshots of `storage`.
    pub fn new(
        storage: Arc<TelemetryStorage>,
        sender: Arc<dyn RecordSender<TelemetryStats>>,
    ) -> TelemetrySynchronizer {
        TelemetrySynchronizer { storage, sender }
    }
}

impl Recorder for TelemetrySynchronizer {
    fn synchronize(&self) -> Result<()> {
        let stats = self.storage.pop_stats();
        self.sender.send(std::slice::from_ref(&stats))
    }
}
