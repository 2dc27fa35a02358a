use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use super::{SegmentStorage, SplitStorage};
use crate::models::{ChangeNumber, Split};

#[derive(Default)]
struct Splits {
    splits: HashMap<String, Arc<Split>>,
    change_number: Option<ChangeNumber>,
}

/// In-memory [`SplitStorage`] allowing concurrent access for readers and writers.
///
/// Split definitions are immutable once stored; updates replace them.
#[derive(Default)]
pub struct InMemorySplitStorage {
    inner: RwLock<Splits>,
}

impl InMemorySplitStorage {
    /// Create a new empty storage.
    pub fn new() -> Self {
        InMemorySplitStorage::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Splits> {
        // Writers never panic while holding the lock, so a poisoned lock still holds consistent
        // data.
        self.inner.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Splits> {
        self.inner.write().unwrap_or_else(|err| err.into_inner())
    }
}

impl SplitStorage for InMemorySplitStorage {
    fn get(&self, name: &str) -> Option<Arc<Split>> {
        self.read().splits.get(name).cloned()
    }

    fn get_split_names(&self) -> Vec<String> {
        self.read().splits.keys().cloned().collect()
    }

    fn get_change_number(&self) -> Option<ChangeNumber> {
        self.read().change_number
    }

    fn set_change_number(&self, change_number: ChangeNumber) {
        self.write().change_number = Some(change_number);
    }

    fn update(&self, to_add: Vec<Split>, to_delete: &[String], change_number: ChangeNumber) {
        // Constructing new values before requesting the lock to minimize lock span.
        let to_add: Vec<(String, Arc<Split>)> = to_add
            .into_iter()
            .map(|split| (split.name.clone(), Arc::new(split)))
            .collect();

        let mut inner = self.write();
        inner.splits.extend(to_add);
        for name in to_delete {
            inner.splits.remove(name);
        }
        inner.change_number = Some(change_number);
    }

    fn get_segment_names(&self) -> HashSet<String> {
        self.read()
            .splits
            .values()
            .flat_map(|split| split.segment_names())
            .collect()
    }

    fn kill_locally(
        &self,
        name: &str,
        default_treatment: &str,
        change_number: ChangeNumber,
    ) -> bool {
        let mut inner = self.write();
        if inner.change_number.is_some_and(|current| current > change_number) {
            return false;
        }
        let Some(split) = inner.splits.get_mut(name) else {
            return false;
        };
        Arc::make_mut(split).kill(default_treatment, change_number);
        true
    }
}

#[derive(Default)]
struct Segment {
    keys: HashSet<String>,
    change_number: ChangeNumber,
}

/// In-memory [`SegmentStorage`] allowing concurrent access for readers and writers.
#[derive(Default)]
pub struct InMemorySegmentStorage {
    segments: RwLock<HashMap<String, Segment>>,
}

impl InMemorySegmentStorage {
    /// Create a new empty storage.
    pub fn new() -> Self {
        InMemorySegmentStorage::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Segment>> {
        self.segments.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Segment>> {
        self.segments.write().unwrap_or_else(|err| err.into_inner())
    }
}

impl SegmentStorage for InMemorySegmentStorage {
    fn get_change_number(&self, segment_name: &str) -> Option<ChangeNumber> {
        self.read()
            .get(segment_name)
            .map(|segment| segment.change_number)
    }

    fn set_change_number(&self, segment_name: &str, change_number: ChangeNumber) {
        self.write()
            .entry(segment_name.to_owned())
            .or_default()
            .change_number = change_number;
    }

    fn update(
        &self,
        segment_name: &str,
        to_add: Vec<String>,
        to_remove: &[String],
        change_number: ChangeNumber,
    ) {
        let mut segments = self.write();
        let segment = segments.entry(segment_name.to_owned()).or_default();
        segment.keys.extend(to_add);
        for key in to_remove {
            segment.keys.remove(key);
        }
        segment.change_number = change_number;
    }

    fn contains_segment(&self, segment_name: &str) -> bool {
        self.read().contains_key(segment_name)
    }

    fn segment_contains(&self, segment_name: &str, key: &str) -> bool {
        self.read()
            .get(segment_name)
            .is_some_and(|segment| segment.keys.contains(key))
    }
}
