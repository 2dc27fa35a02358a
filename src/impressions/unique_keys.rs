use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, RwLock},
};

use crate::{models::UniqueKeys, storage::FullHook};

#[derive(Default)]
struct Cache {
    keys: HashMap<String, HashSet<String>>,
    size: usize,
}

/// Tracks which keys have been evaluated for each feature.
///
/// Once more than `cache_size` keys are tracked, the full hook is called so the keys get shipped
/// out of cycle.
pub struct UniqueKeysTracker {
    cache_size: usize,
    cache: Mutex<Cache>,
    full_hook: RwLock<Option<FullHook>>,
}

impl UniqueKeysTracker {
    /// Create a tracker that asks for a flush once `cache_size` keys are tracked.
    pub fn new(cache_size: usize) -> UniqueKeysTracker {
        UniqueKeysTracker {
            cache_size,
            cache: Mutex::new(Cache::default()),
            full_hook: RwLock::new(None),
        }
    }

    /// Set a callback invoked whenever the cache grows over its size.
    pub fn set_full_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.full_hook.write().unwrap_or_else(|err| err.into_inner()) = Some(Box::new(hook));
    }

    /// Track `key` for `feature`. Returns `true` if the key was not tracked yet.
    pub fn track(&self, key: &str, feature: &str) -> bool {
        let (inserted, full) = {
            let mut cache = self.cache.lock().unwrap_or_else(|err| err.into_inner());
            let inserted = cache
                .keys
                .entry(feature.to_owned())
                .or_default()
                .insert(key.to_owned());
            if inserted {
                cache.size += 1;
            }
            (inserted, cache.size > self.cache_size)
        };

        if full {
            log::debug!(target: "splitsync", cache_size = self.cache_size; "unique keys cache is full, flushing");
            if let Some(hook) = &*self.full_hook.read().unwrap_or_else(|err| err.into_inner()) {
                hook();
            }
        }
        inserted
    }

    /// Remove and return every tracked key.
    pub fn pop_all(&self) -> Vec<UniqueKeys> {
        let cache = std::mem::take(&mut *self.cache.lock().unwrap_or_else(|err| err.into_inner()));
        cache
            .keys
            .into_iter()
            .map(|(feature, keys)| UniqueKeys {
                feature,
                keys: keys.into_iter().collect(),
            })
            .collect()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|err| err.into_inner()).size
    }

    /// Returns `true` if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::UniqueKeysTracker;

    #[test]
    fn tracks_distinct_keys_per_feature() {
        let tracker = UniqueKeysTracker::new(100);

        assert!(tracker.track("alice", "checkout"));
        assert!(!tracker.track("alice", "checkout"));
        assert!(tracker.track("alice", "search"));
        assert!(tracker.track("bob", "checkout"));
        assert_eq!(tracker.len(), 3);

        let mut keys = tracker.pop_all();
        keys.sort_by(|a, b| a.feature.cmp(&b.feature));
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].feature, "checkout");
        assert_eq!(keys[0].keys.len(), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn calls_hook_when_over_capacity() {
        let tracker = UniqueKeysTracker::new(2);
        let hook_calls = Arc::new(AtomicUsize::new(0));
        {
            let hook_calls = hook_calls.clone();
            tracker.set_full_hook(move || {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        tracker.track("a", "f");
        tracker.track("b", "f");
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);

        tracker.track("c", "f");
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }
}
