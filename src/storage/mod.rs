//! Storage contracts consumed by the synchronizers, and thread-safe in-memory implementations.
//!
//! Storage is single-writer (the synchronizer owning a collection) and multi-reader (foreground
//! evaluation). Implementations are responsible for their own internal synchronization.
use std::{collections::HashSet, sync::Arc};

use crate::models::{ChangeNumber, Split};

mod inmemory;
mod queue;
mod telemetry;

pub use inmemory::{InMemorySegmentStorage, InMemorySplitStorage};
pub(crate) use queue::FullHook;
pub use queue::{BoundedQueue, PutOutcome};
pub use telemetry::{Resource, TelemetryStats, TelemetryStorage};

/// Storage of the split (feature flag) collection.
pub trait SplitStorage: Send + Sync {
    /// Get a split by name.
    fn get(&self, name: &str) -> Option<Arc<Split>>;

    /// Names of every stored split.
    fn get_split_names(&self) -> Vec<String>;

    /// Change number the collection is synchronized to. `None` if it never was.
    fn get_change_number(&self) -> Option<ChangeNumber>;

    /// Set the change number without changing the collection.
    fn set_change_number(&self, change_number: ChangeNumber);

    /// Upsert `to_add`, remove `to_delete` and advance the change number, atomically for readers.
    fn update(&self, to_add: Vec<Split>, to_delete: &[String], change_number: ChangeNumber);

    /// Names of every segment referenced by stored splits.
    fn get_segment_names(&self) -> HashSet<String>;

    /// Kill a split locally, ahead of the next fetch. Returns `false` if the split does not exist
    /// or the collection is already newer than `change_number`.
    fn kill_locally(&self, name: &str, default_treatment: &str, change_number: ChangeNumber)
        -> bool;
}

/// Storage of segments (named sets of keys), each versioned independently.
pub trait SegmentStorage: Send + Sync {
    /// Change number `segment_name` is synchronized to. `None` if it never was.
    fn get_change_number(&self, segment_name: &str) -> Option<ChangeNumber>;

    /// Set the change number of a segment without changing its keys.
    fn set_change_number(&self, segment_name: &str, change_number: ChangeNumber);

    /// Add and remove keys of a segment and advance its change number. Creates the segment if it
    /// does not exist yet.
    fn update(
        &self,
        segment_name: &str,
        to_add: Vec<String>,
        to_remove: &[String],
        change_number: ChangeNumber,
    );

    /// Returns `true` if the segment has been stored at least once.
    fn contains_segment(&self, segment_name: &str) -> bool;

    /// Returns `true` if `key` belongs to the segment.
    fn segment_contains(&self, segment_name: &str, key: &str) -> bool;
}
