use std::{collections::HashMap, sync::Mutex};

use crate::models::Impression;

/// Remembers when each distinct impression was last seen.
///
/// Impressions are identified by an md5 hash of key, feature, treatment, label and change number.
/// The cache is bounded; once full it is cleared, which only costs re-shipping a few impressions.
pub struct ImpressionObserver {
    capacity: usize,
    seen: Mutex<HashMap<u64, i64>>,
}

impl ImpressionObserver {
    /// Create an observer remembering at most `capacity` impressions.
    pub fn new(capacity: usize) -> ImpressionObserver {
        ImpressionObserver {
            capacity: capacity.max(1),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `impression` as seen and return the time it was previously seen, if ever.
    pub fn test_and_set(&self, impression: &Impression) -> Option<i64> {
        let hash = impression_hash(impression);
        let mut seen = self.seen.lock().unwrap_or_else(|err| err.into_inner());
        if seen.len() >= self.capacity && !seen.contains_key(&hash) {
            seen.clear();
        }
        seen.insert(hash, impression.time)
    }
}

fn impression_hash(impression: &Impression) -> u64 {
    let hash = md5::compute(format!(
        "{}:{}:{}:{}:{}",
        impression.key_name,
        impression.feature,
        impression.treatment,
        impression.label,
        impression.change_number
    ));
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[0..8]);
    u64::from_be_bytes(bytes)
}
