//! Process-wide accounting of live clients per API key.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, OnceLock},
};

/// Counts live clients per API key, to warn about redundant instances.
///
/// Every client holds its own connections and background threads, so running more than one per
/// process is rarely intended.
#[derive(Debug, Default)]
pub struct FactoryRegistry {
    active: Mutex<HashMap<String, usize>>,
}

impl FactoryRegistry {
    /// Create a registry with no active client.
    pub fn new() -> FactoryRegistry {
        FactoryRegistry::default()
    }

    /// The registry shared by every client of the process that was not given its own.
    pub fn global() -> Arc<FactoryRegistry> {
        static GLOBAL: OnceLock<Arc<FactoryRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(FactoryRegistry::new())))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.active.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Record a new client for `api_key`, warning if clients already exist.
    pub fn increment(&self, api_key: &str) {
        let mut active = self.lock();
        let others = active
            .iter()
            .filter(|(key, _)| key.as_str() != api_key)
            .map(|(_, count)| *count)
            .sum::<usize>();
        let count = active.entry(api_key.to_owned()).or_default();

        if *count > 0 {
            log::warn!(target: "splitsync",
                instances = *count;
                "factory instantiation: you already have {} client(s) with this API key. \
                 We recommend keeping only one instance of the client at all times",
                *count);
        } else if others > 0 {
            log::warn!(target: "splitsync",
                instances = others;
                "factory instantiation: you already have an instance of the client with a \
                 different API key. We recommend keeping only one instance of the client at all times");
        }
        *count += 1;
    }

    /// Record that a client for `api_key` has been destroyed.
    pub fn decrement(&self, api_key: &str) {
        let mut active = self.lock();
        match active.get_mut(api_key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                active.remove(api_key);
            }
            None => {
                log::debug!(target: "splitsync", "decrementing the count of an unknown API key");
            }
        }
    }

    /// Number of live clients for `api_key`.
    pub fn count(&self, api_key: &str) -> usize {
        self.lock().get(api_key).copied().unwrap_or(0)
    }

    /// Number of live clients, all API keys included.
    pub fn active_count(&self) -> usize {
        self.lock().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::FactoryRegistry;

    #[test]
    fn counts_clients_per_key() {
        let registry = FactoryRegistry::new();

        registry.increment("key-1");
        registry.increment("key-1");
        registry.increment("key-2");

        assert_eq!(registry.count("key-1"), 2);
        assert_eq!(registry.count("key-2"), 1);
        assert_eq!(registry.active_count(), 3);

        registry.decrement("key-1");
        registry.decrement("key-2");
        registry.decrement("key-2");

        assert_eq!(registry.count("key-1"), 1);
        assert_eq!(registry.count("key-2"), 0);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn global_instance_is_shared() {
        assert!(Arc::ptr_eq(
            &FactoryRegistry::global(),
            &FactoryRegistry::global()
        ));
    }
}
