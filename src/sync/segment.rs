use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::{synchronize_with_cdn_bypass, FetchRetryConfig};
use crate::{
    api::{FetchOptions, SegmentFetcher},
    models::{ChangeNumber, NEVER_SYNCED},
    storage::{SegmentStorage, SplitStorage},
    tasks::{Signal, WorkerPool},
    Result,
};

/// Fetches changes of a single segment. Shared between the synchronizer and its workers.
struct SegmentFetch {
    fetcher: Arc<dyn SegmentFetcher>,
    storage: Arc<dyn SegmentStorage>,
    config: FetchRetryConfig,
    // One lock per segment, held for the whole synchronization so that a pool job and an
    // on-demand sync of the same segment never interleave.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SegmentFetch {
    fn lock_for(&self, segment_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|err| err.into_inner());
        Arc::clone(locks.entry(segment_name.to_owned()).or_default())
    }

    fn fetch_until(
        &self,
        segment_name: &str,
        options: &FetchOptions,
        till: Option<ChangeNumber>,
    ) -> Result<ChangeNumber> {
        loop {
            let change_number = self
                .storage
                .get_change_number(segment_name)
                .unwrap_or(NEVER_SYNCED);
            if till.is_some_and(|till| till <= change_number) {
                return Ok(change_number);
            }

            let changes = self.fetcher.fetch(segment_name, change_number, options)?;
            log::debug!(target: "splitsync",
                segment = segment_name,
                since = changes.since,
                till = changes.till,
                added = changes.added.len(),
                removed = changes.removed.len();
                "applying segment changes");
            self.storage
                .update(segment_name, changes.added, &changes.removed, changes.till);

            if changes.till == changes.since {
                return Ok(changes.till);
            }
        }
    }

    fn synchronize(&self, segment_name: &str, till: Option<ChangeNumber>) -> Result<bool> {
        let lock = self.lock_for(segment_name);
        let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());
        synchronize_with_cdn_bypass(segment_name, &self.config, till, |options| {
            self.fetch_until(segment_name, options, till)
        })
    }
}

/// Keeps segments in [`SegmentStorage`] up to date with the backend.
///
/// Segments are independent collections, so they are fetched concurrently on a fixed-size
/// [`WorkerPool`].
pub struct SegmentSynchronizer {
    segments: Arc<SegmentFetch>,
    split_storage: Arc<dyn SplitStorage>,
    pool: WorkerPool<String>,
}

impl SegmentSynchronizer {
    /// Number of workers used when none is configured.
    pub const DEFAULT_WORKERS: usize = 10;

    /// Create a synchronizer and start its workers.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a worker thread could not be spawned.
    pub fn new(
        fetcher: Arc<dyn SegmentFetcher>,
        storage: Arc<dyn SegmentStorage>,
        split_storage: Arc<dyn SplitStorage>,
        config: FetchRetryConfig,
        workers: usize,
    ) -> std::io::Result<SegmentSynchronizer> {
        let segments = Arc::new(SegmentFetch {
            fetcher,
            storage,
            config,
            locks: Mutex::default(),
        });

        let pool = {
            let segments = Arc::clone(&segments);
            WorkerPool::new("segments", workers, move |segment_name: String| -> Result<bool> {
                segments.synchronize(&segment_name, None)
            })
        };
        pool.start()?;

        Ok(SegmentSynchronizer {
            segments,
            split_storage,
            pool,
        })
    }

    /// Bring one segment to at least `till`, on the calling thread.
    pub fn synchronize_segment(
        &self,
        segment_name: &str,
        till: Option<ChangeNumber>,
    ) -> Result<bool> {
        self.segments.synchronize(segment_name, till)
    }

    /// Synchronize `segment_names` (every segment referenced by stored splits if `None`) on the
    /// worker pool.
    ///
    /// With `dont_wait`, returns right after scheduling. Otherwise blocks until every job is
    /// done and returns whether all of them succeeded.
    pub fn synchronize_segments(
        &self,
        segment_names: Option<Vec<String>>,
        dont_wait: bool,
    ) -> bool {
        let segment_names = segment_names
            .unwrap_or_else(|| self.split_storage.get_segment_names().into_iter().collect());
        for segment_name in segment_names {
            if !self.pool.submit_work(segment_name) {
                return false;
            }
        }
        if dont_wait {
            return true;
        }
        !self.pool.wait_for_completion()
    }

    /// Returns `true` if the segment has been synchronized at least once.
    pub fn segment_exist_in_storage(&self, segment_name: &str) -> bool {
        self.segments.storage.contains_segment(segment_name)
    }

    /// Stop the workers. `done` is set once every worker has exited.
    pub fn shutdown(&self, done: Option<Signal>) {
        self.pool.stop(done);
    }
}
