//! Decides which impressions get shipped individually and which ones are only counted.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::Impression;

mod counter;
mod observer;
mod unique_keys;

pub use counter::{truncate_to_hour, ImpressionsCounter};
pub use observer::ImpressionObserver;
pub use unique_keys::UniqueKeysTracker;

/// How impressions are reported to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpressionsMode {
    /// Ship the first impression of each kind per hour, count the rest.
    #[default]
    Optimized,
    /// Ship every impression.
    Debug,
    /// Ship nothing individually; only counts and unique keys.
    None,
}

/// Impressions left to queue after applying the [`ImpressionsMode`].
#[derive(Debug, Default)]
pub struct ProcessedImpressions {
    /// Impressions to put on the queue.
    pub to_queue: Vec<Impression>,
    /// Impressions that were only counted.
    pub deduped: usize,
}

const OBSERVER_CAPACITY: usize = 500_000;

/// Applies an [`ImpressionsMode`] to impressions produced by evaluation.
pub struct ImpressionsManager {
    mode: ImpressionsMode,
    observer: ImpressionObserver,
    counter: Arc<ImpressionsCounter>,
    unique_keys: Arc<UniqueKeysTracker>,
}

impl ImpressionsManager {
    /// Create a manager applying `mode`, recording into `counter` and `unique_keys`.
    pub fn new(
        mode: ImpressionsMode,
        counter: Arc<ImpressionsCounter>,
        unique_keys: Arc<UniqueKeysTracker>,
    ) -> ImpressionsManager {
        ImpressionsManager {
            mode,
            observer: ImpressionObserver::new(OBSERVER_CAPACITY),
            counter,
            unique_keys,
        }
    }

    /// Process impressions, updating counters, and return those to queue for shipping.
    pub fn process(&self, impressions: Vec<Impression>) -> ProcessedImpressions {
        match self.mode {
            ImpressionsMode::Debug => ProcessedImpressions {
                to_queue: impressions
                    .into_iter()
                    .map(|impression| self.observe(impression))
                    .collect(),
                deduped: 0,
            },
            ImpressionsMode::Optimized => {
                let mut processed = ProcessedImpressions::default();
                for impression in impressions {
                    let impression = self.observe(impression);
                    self.counter.track(&impression.feature, impression.time, 1);
                    match impression.previous_time {
                        Some(previous) if previous >= truncate_to_hour(impression.time) => {
                            processed.deduped += 1
                        }
                        _ => processed.to_queue.push(impression),
                    }
                }
                processed
            }
            ImpressionsMode::None => {
                let deduped = impressions.len();
                for impression in impressions {
                    self.counter.track(&impression.feature, impression.time, 1);
                    self.unique_keys
                        .track(&impression.key_name, &impression.feature);
                }
                ProcessedImpressions {
                    to_queue: Vec::new(),
                    deduped,
                }
            }
        }
    }

    fn observe(&self, mut impression: Impression) -> Impression {
        impression.previous_time = self.observer.test_and_set(&impression);
        impression
    }
}
