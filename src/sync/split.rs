use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use super::{synchronize_with_cdn_bypass, FetchRetryConfig};
use crate::{
    api::{FetchOptions, SplitFetcher},
    models::{ChangeNumber, SplitStatus, TryParse, NEVER_SYNCED},
    storage::SplitStorage,
    Result,
};

/// Outcome of [`SplitSynchronizer::synchronize_splits`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSyncResult {
    /// Whether the requested change number was reached.
    pub converged: bool,
    /// Segments referenced by the active splits fetched during this synchronization.
    pub segment_names: HashSet<String>,
}

/// Keeps the split collection in [`SplitStorage`] up to date with the backend.
pub struct SplitSynchronizer {
    fetcher: Arc<dyn SplitFetcher>,
    storage: Arc<dyn SplitStorage>,
    config: FetchRetryConfig,
    // Held for the whole synchronization so periodic, push-triggered and startup fetches of the
    // collection never interleave.
    sync_lock: Mutex<()>,
}

impl SplitSynchronizer {
    /// Create a synchronizer fetching into `storage`. `config` applies to on-demand fetches.
    pub fn new(
        fetcher: Arc<dyn SplitFetcher>,
        storage: Arc<dyn SplitStorage>,
        config: FetchRetryConfig,
    ) -> SplitSynchronizer {
        SplitSynchronizer {
            fetcher,
            storage,
            config,
            sync_lock: Mutex::new(()),
        }
    }

    /// Bring the collection to at least `till`, or to the latest version if `till` is `None`.
    ///
    /// # Errors
    ///
    /// Backend errors are returned as soon as they happen. Failing to reach `till` is not an
    /// error and is reported in [`SplitSyncResult::converged`].
    pub fn synchronize_splits(&self, till: Option<ChangeNumber>) -> Result<SplitSyncResult> {
        let _guard = self.sync_lock.lock().unwrap_or_else(|err| err.into_inner());

        let mut segment_names = HashSet::new();
        let converged = synchronize_with_cdn_bypass("splits", &self.config, till, |options| {
            self.fetch_until(options, till, &mut segment_names)
        })?;

        Ok(SplitSyncResult {
            converged,
            segment_names,
        })
    }

    /// Kill a split in storage without talking to the backend.
    ///
    /// Returns `false` if the split is unknown or storage already holds a newer version.
    pub fn kill_split(
        &self,
        split_name: &str,
        default_treatment: &str,
        change_number: ChangeNumber,
    ) -> bool {
        let killed = self
            .storage
            .kill_locally(split_name, default_treatment, change_number);
        if killed {
            log::info!(target: "splitsync",
                split = split_name,
                default_treatment,
                change_number;
                "split killed locally");
        } else {
            log::debug!(target: "splitsync", split = split_name, change_number; "ignoring stale or unknown split kill");
        }
        killed
    }

    /// Fetch and apply pages until the backend reports no further changes.
    fn fetch_until(
        &self,
        options: &FetchOptions,
        till: Option<ChangeNumber>,
        segment_names: &mut HashSet<String>,
    ) -> Result<ChangeNumber> {
        loop {
            let change_number = self.storage.get_change_number().unwrap_or(NEVER_SYNCED);
            if till.is_some_and(|till| till <= change_number) {
                return Ok(change_number);
            }

            let changes = self.fetcher.fetch(change_number, options)?;

            let mut to_add = Vec::new();
            let mut to_delete = Vec::new();
            for split in changes.splits {
                match split {
                    TryParse::Parsed(split) => match split.status {
                        SplitStatus::Active => {
                            segment_names.extend(split.segment_names());
                            to_add.push(split);
                        }
                        SplitStatus::Archived => to_delete.push(split.name),
                    },
                    TryParse::ParseFailed(value) => {
                        log::warn!(target: "splitsync", "skipping split that failed to parse: {}", value);
                    }
                }
            }
            log::debug!(target: "splitsync",
                since = changes.since,
                till = changes.till,
                upserted = to_add.len(),
                removed = to_delete.len();
                "applying split changes");
            self.storage.update(to_add, &to_delete, changes.till);

            if changes.till == changes.since {
                return Ok(changes.till);
            }
        }
    }
}
