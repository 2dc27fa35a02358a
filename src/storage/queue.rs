use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, RwLock},
};

pub(crate) type FullHook = Box<dyn Fn() + Send + Sync>;

/// Result of [`BoundedQueue::put`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Records accepted into the queue.
    pub queued: usize,
    /// Records rejected because the queue was full.
    pub dropped: usize,
}

/// A bounded, insertion-ordered buffer of records waiting to be shipped.
///
/// Any number of producers may [`put`](BoundedQueue::put) records without blocking on the
/// consumer. When the queue is full, extra records are rejected and the full hook is called
/// (usually to flush the queue out of cycle).
pub struct BoundedQueue<R> {
    name: &'static str,
    capacity: usize,
    records: Mutex<VecDeque<R>>,
    full_hook: RwLock<Option<FullHook>>,
}

impl<R> BoundedQueue<R> {
    /// Create a queue holding at most `capacity` records.
    pub fn new(name: &'static str, capacity: usize) -> BoundedQueue<R> {
        BoundedQueue {
            name,
            capacity,
            records: Mutex::new(VecDeque::new()),
            full_hook: RwLock::new(None),
        }
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<R>> {
        self.records.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Set a callback invoked whenever records are rejected because the queue is full.
    pub fn set_full_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.full_hook.write().unwrap_or_else(|err| err.into_inner()) = Some(Box::new(hook));
    }

    /// Append records, rejecting those that do not fit.
    pub fn put(&self, records: impl IntoIterator<Item = R>) -> PutOutcome {
        let mut outcome = PutOutcome::default();
        {
            let mut queue = self.records();
            for record in records {
                if queue.len() >= self.capacity {
                    outcome.dropped += 1;
                } else {
                    queue.push_back(record);
                    outcome.queued += 1;
                }
            }
        }

        if outcome.dropped > 0 {
            log::warn!(target: "splitsync",
                queue = self.name,
                dropped = outcome.dropped,
                capacity = self.capacity;
                "queue is full, dropping records. Consider increasing the queue size");
            // The hook runs outside of the queue lock, it may want to drain the queue.
            if let Some(hook) = &*self.full_hook.read().unwrap_or_else(|err| err.into_inner()) {
                hook();
            }
        }
        outcome
    }

    /// Remove and return up to `count` of the oldest records.
    pub fn pop_many(&self, count: usize) -> Vec<R> {
        let mut queue = self.records();
        let count = count.min(queue.len());
        queue.drain(..count).collect()
    }

    /// Number of records waiting.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Returns `true` if no record is waiting.
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{BoundedQueue, PutOutcome};

    #[test]
    fn rejects_records_over_capacity_and_calls_hook() {
        let queue = BoundedQueue::new("test", 3);
        let hook_calls = Arc::new(AtomicUsize::new(0));
        {
            let hook_calls = hook_calls.clone();
            queue.set_full_hook(move || {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(
            queue.put([1, 2]),
            PutOutcome {
                queued: 2,
                dropped: 0
            }
        );
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);

        assert_eq!(
            queue.put([3, 4, 5]),
            PutOutcome {
                queued: 1,
                dropped: 2
            }
        );
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn pops_in_insertion_order() {
        let queue = BoundedQueue::new("test", 10);
        queue.put(1..=5);

        assert_eq!(queue.pop_many(3), vec![1, 2, 3]);
        assert_eq!(queue.pop_many(3), vec![4, 5]);
        assert!(queue.pop_many(3).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(BoundedQueue::new("test", 100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        queue.put([i]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 100);
    }
}
