use std::{collections::HashMap, sync::Mutex};

use crate::models::ImpressionCount;

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Truncate a timestamp (milliseconds) to the start of its hour.
pub fn truncate_to_hour(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(HOUR_MS)
}

/// Counts impressions per feature and hour.
#[derive(Default)]
pub struct ImpressionsCounter {
    counts: Mutex<HashMap<(String, i64), u64>>,
}

impl ImpressionsCounter {
    /// Create an empty counter.
    pub fn new() -> ImpressionsCounter {
        ImpressionsCounter::default()
    }

    /// Count `count` impressions of `feature` at `timestamp_ms`.
    pub fn track(&self, feature: &str, timestamp_ms: i64, count: u64) {
        let mut counts = self.counts.lock().unwrap_or_else(|err| err.into_inner());
        *counts
            .entry((feature.to_owned(), truncate_to_hour(timestamp_ms)))
            .or_default() += count;
    }

    /// Remove and return every count.
    pub fn pop_all(&self) -> Vec<ImpressionCount> {
        let counts =
            std::mem::take(&mut *self.counts.lock().unwrap_or_else(|err| err.into_inner()));
        counts
            .into_iter()
            .map(|((feature, time_frame), count)| ImpressionCount {
                feature,
                time_frame,
                count,
            })
            .collect()
    }
}
