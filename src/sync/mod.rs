//! Synchronization of local storage with the backend.
//!
//! [`SplitSynchronizer`] and [`SegmentSynchronizer`] bring versioned collections up to date by
//! fetching deltas until the backend reports no further changes ("fetch until consistent").
//! [`RecordSynchronizer`] and friends drain locally-produced records back to the backend.
//! [`Synchronizer`] wires every one of them to a [`PeriodicTask`](crate::tasks::PeriodicTask) and
//! [`Manager`] drives the whole lifecycle.
use std::time::Duration;

use crate::{api::FetchOptions, backoff::Backoff, models::ChangeNumber, Result};

mod drain;
#[cfg(test)]
mod fakes;
mod manager;
mod readiness;
mod recorders;
mod segment;
mod split;
mod synchronizer;

pub use drain::{RecordSynchronizer, Recorder, RecorderTask};
pub use manager::Manager;
pub use readiness::{Readiness, Status};
pub use recorders::{ImpressionCountSynchronizer, TelemetrySynchronizer, UniqueKeysSynchronizer};
pub use segment::SegmentSynchronizer;
pub use split::{SplitSyncResult, SplitSynchronizer};
pub use synchronizer::{SyncPeriods, Synchronizer, Synchronizers};

/// Retry policy for on-demand fetches that must reach a target change number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRetryConfig {
    /// First wait between two attempts.
    pub backoff_base: Duration,
    /// Longest wait between two attempts.
    pub backoff_max_wait: Duration,
    /// Attempts per round. There are two rounds: a plain one and one bypassing the CDN.
    pub max_attempts: u32,
}

impl FetchRetryConfig {
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(10);
    pub const DEFAULT_BACKOFF_MAX_WAIT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
}

impl Default for FetchRetryConfig {
    fn default() -> FetchRetryConfig {
        FetchRetryConfig {
            backoff_base: FetchRetryConfig::DEFAULT_BACKOFF_BASE,
            backoff_max_wait: FetchRetryConfig::DEFAULT_BACKOFF_MAX_WAIT,
            max_attempts: FetchRetryConfig::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Outcome of one round of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attempts {
    pub converged: bool,
    pub attempts: u32,
    pub change_number: ChangeNumber,
}

/// Run `fetch_until` until the collection reaches `till` (or once, if `till` is `None`), sleeping
/// according to `backoff` between attempts, at most `max_attempts` times.
pub(crate) fn attempt_sync(
    max_attempts: u32,
    backoff: &mut Backoff,
    till: Option<ChangeNumber>,
    mut fetch_until: impl FnMut() -> Result<ChangeNumber>,
) -> Result<Attempts> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let change_number = fetch_until()?;
        if till.map_or(true, |till| till <= change_number) {
            return Ok(Attempts {
                converged: true,
                attempts,
                change_number,
            });
        }
        if attempts >= max_attempts {
            return Ok(Attempts {
                converged: false,
                attempts,
                change_number,
            });
        }
        std::thread::sleep(backoff.get());
    }
}

/// Bring a collection to at least `till`.
///
/// Runs a round of [`attempt_sync`] with no-cache options. If `till` is not reached, runs another
/// full round with the last seen change number in the query string to bypass CDN caches. Returns
/// whether the target was reached. Backend errors are returned right away.
pub(crate) fn synchronize_with_cdn_bypass(
    collection: &str,
    config: &FetchRetryConfig,
    till: Option<ChangeNumber>,
    mut fetch_until: impl FnMut(&FetchOptions) -> Result<ChangeNumber>,
) -> Result<bool> {
    let mut backoff = Backoff::new(config.backoff_base, config.backoff_max_wait);
    let max_attempts = config.max_attempts.max(1);

    let no_cache = FetchOptions::no_cache();
    let first = attempt_sync(max_attempts, &mut backoff, till, || fetch_until(&no_cache))?;
    if first.converged {
        log::debug!(target: "splitsync",
            collection,
            attempts = first.attempts,
            change_number = first.change_number;
            "refresh completed");
        return Ok(true);
    }

    backoff.reset();
    let bypass = FetchOptions::cdn_bypass(first.change_number);
    let second = attempt_sync(max_attempts, &mut backoff, till, || fetch_until(&bypass))?;
    if second.converged {
        log::debug!(target: "splitsync",
            collection,
            attempts = second.attempts,
            change_number = second.change_number;
            "refresh completed bypassing the CDN");
        return Ok(true);
    }

    log::warn!(target: "splitsync",
        collection,
        attempts = second.attempts,
        change_number = second.change_number;
        "no changes fetched after {} attempts with CDN bypassed", second.attempts);
    Ok(false)
}
