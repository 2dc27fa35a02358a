use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use super::{
    ImpressionCountSynchronizer, Readiness, RecordSynchronizer, RecorderTask, SegmentSynchronizer,
    SplitSynchronizer, TelemetrySynchronizer, UniqueKeysSynchronizer,
};
use crate::{
    backoff::Backoff,
    models::{ChangeNumber, Event, Impression},
    tasks::{PeriodicTask, Signal},
    Result,
};

/// Every synchronizer driven by a [`Synchronizer`].
pub struct Synchronizers {
    /// Split changes.
    pub splits: Arc<SplitSynchronizer>,
    /// Segment changes.
    pub segments: Arc<SegmentSynchronizer>,
    /// Impressions queue.
    pub impressions: Arc<RecordSynchronizer<Impression>>,
    /// Events queue.
    pub events: Arc<RecordSynchronizer<Event>>,
    /// Impression counts.
    pub impression_counts: Arc<ImpressionCountSynchronizer>,
    /// Unique keys.
    pub unique_keys: Arc<UniqueKeysSynchronizer>,
    /// Telemetry.
    pub telemetry: Arc<TelemetrySynchronizer>,
}

/// How often each background task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPeriods {
    /// Split fetching.
    pub splits: Duration,
    /// Segment fetching.
    pub segments: Duration,
    /// Impressions shipping.
    pub impressions: Duration,
    /// Events shipping.
    pub events: Duration,
    /// Impression counts shipping.
    pub impression_counts: Duration,
    /// Unique keys shipping.
    pub unique_keys: Duration,
    /// Telemetry shipping.
    pub telemetry: Duration,
    /// Split and segment fetch periods are shortened by a random duration of up to this value.
    pub fetch_jitter: Duration,
}

impl Default for SyncPeriods {
    fn default() -> SyncPeriods {
        SyncPeriods {
            splits: Duration::from_secs(30),
            segments: Duration::from_secs(30),
            impressions: Duration::from_secs(300),
            events: Duration::from_secs(10),
            impression_counts: Duration::from_secs(1800),
            unique_keys: Duration::from_secs(900),
            telemetry: Duration::from_secs(3600),
            fetch_jitter: Duration::ZERO,
        }
    }
}

/// Drives every synchronizer: on-demand synchronization, periodic fetching and periodic data
/// recording.
pub struct Synchronizer {
    splits: Arc<SplitSynchronizer>,
    segments: Arc<SegmentSynchronizer>,
    split_task: PeriodicTask,
    segment_task: PeriodicTask,
    recording_tasks: Vec<Arc<PeriodicTask>>,
    telemetry_task: PeriodicTask,
    sync_all_backoff: (Duration, Duration),
    stopped: Signal,
}

impl Synchronizer {
    /// Create a synchronizer. No background task is started.
    ///
    /// The first successful periodic split fetch marks `readiness` as ready. It only matters
    /// when the initial synchronization gave up.
    pub fn new(
        synchronizers: Synchronizers,
        periods: &SyncPeriods,
        readiness: Arc<Readiness>,
    ) -> Synchronizer {
        let split_task = {
            let splits = Arc::clone(&synchronizers.splits);
            PeriodicTask::new("splits", periods.splits, move || -> Result<()> {
                splits.synchronize_splits(None)?;
                readiness.mark_ready();
                Ok(())
            })
            .with_jitter(periods.fetch_jitter)
        };

        let segment_task = {
            let segments = Arc::clone(&synchronizers.segments);
            PeriodicTask::new("segments", periods.segments, move || -> Result<()> {
                if !segments.synchronize_segments(None, false) {
                    log::warn!(target: "splitsync", "some segments failed to synchronize");
                }
                Ok(())
            })
            .with_jitter(periods.fetch_jitter)
        };

        let impressions_task = Arc::new(PeriodicTask::new(
            "impressions",
            periods.impressions,
            RecorderTask(Arc::clone(&synchronizers.impressions)),
        ));
        synchronizers
            .impressions
            .queue()
            .set_full_hook(force_run(&impressions_task));

        let events_task = Arc::new(PeriodicTask::new(
            "events",
            periods.events,
            RecorderTask(Arc::clone(&synchronizers.events)),
        ));
        synchronizers
            .events
            .queue()
            .set_full_hook(force_run(&events_task));

        let impression_counts_task = Arc::new(PeriodicTask::new(
            "impression-counts",
            periods.impression_counts,
            RecorderTask(synchronizers.impression_counts),
        ));

        let unique_keys_task = Arc::new(PeriodicTask::new(
            "unique-keys",
            periods.unique_keys,
            RecorderTask(Arc::clone(&synchronizers.unique_keys)),
        ));
        synchronizers
            .unique_keys
            .tracker()
            .set_full_hook(force_run(&unique_keys_task));

        let telemetry_task = PeriodicTask::new(
            "telemetry",
            periods.telemetry,
            RecorderTask(synchronizers.telemetry),
        );

        Synchronizer {
            splits: synchronizers.splits,
            segments: synchronizers.segments,
            split_task,
            segment_task,
            recording_tasks: vec![
                impressions_task,
                events_task,
                impression_counts_task,
                unique_keys_task,
            ],
            telemetry_task,
            sync_all_backoff: (Backoff::DEFAULT_BASE, Backoff::DEFAULT_MAX_WAIT),
            stopped: Signal::new(),
        }
    }

    /// Override the backoff used between [`Synchronizer::sync_all`] retries.
    pub fn with_sync_all_backoff(mut self, base: Duration, max_wait: Duration) -> Synchronizer {
        self.sync_all_backoff = (base, max_wait);
        self
    }

    /// Synchronize splits, then the segments they reference that are not in storage yet.
    ///
    /// Failures are retried with backoff, `max_retries` times (forever if `None`). Returns
    /// `Ok(true)` on success and `Ok(false)` when giving up, which includes a "URI too long"
    /// response (never retried) and a shutdown during a retry wait.
    ///
    /// # Errors
    ///
    /// Errors that no retry can fix (see
    /// [`Error::is_unrecoverable`](crate::Error::is_unrecoverable)) are returned right away.
    pub fn sync_all(&self, max_retries: Option<u32>) -> Result<bool> {
        let (base, max_wait) = self.sync_all_backoff;
        let mut backoff = Backoff::new(base, max_wait);
        let mut retries = 0;
        loop {
            let err = match self.synchronize_splits_and_segments() {
                Ok(()) => return Ok(true),
                Err(err) => err,
            };

            if err.is_uri_too_long() {
                log::error!(target: "splitsync", "synchronization aborted, the request URI is too long: {}", err);
                return Ok(false);
            }
            if err.is_unrecoverable() {
                log::error!(target: "splitsync", "synchronization failed and cannot be retried: {}", err);
                return Err(err);
            }

            retries += 1;
            if max_retries.is_some_and(|max_retries| retries > max_retries) {
                log::error!(target: "splitsync", retries = retries - 1; "giving up on synchronization: {}", err);
                return Ok(false);
            }

            let wait = backoff.get();
            log::warn!(target: "splitsync", retry = retries; "synchronization failed, retrying in {:?}: {}", wait, err);
            if self.stopped.wait_timeout(wait) {
                log::debug!(target: "splitsync", "synchronization interrupted by shutdown");
                return Ok(false);
            }
        }
    }

    fn synchronize_splits_and_segments(&self) -> Result<()> {
        let result = self.splits.synchronize_splits(None)?;
        let missing = self.missing_segments(result.segment_names);
        if !missing.is_empty() && !self.segments.synchronize_segments(Some(missing), false) {
            log::warn!(target: "splitsync", "some segments failed to synchronize");
        }
        Ok(())
    }

    fn missing_segments(&self, segment_names: impl IntoIterator<Item = String>) -> Vec<String> {
        segment_names
            .into_iter()
            .filter(|segment_name| !self.segments.segment_exist_in_storage(segment_name))
            .collect()
    }

    /// Bring splits to at least `till`. With `sync_segments`, segments newly referenced by the
    /// fetched splits are scheduled for synchronization without waiting for them.
    ///
    /// Returns whether `till` was reached.
    pub fn synchronize_splits(
        &self,
        till: Option<ChangeNumber>,
        sync_segments: bool,
    ) -> Result<bool> {
        let result = self.splits.synchronize_splits(till)?;
        if sync_segments {
            let missing = self.missing_segments(result.segment_names);
            if !missing.is_empty() {
                self.segments.synchronize_segments(Some(missing), true);
            }
        }
        Ok(result.converged)
    }

    /// Bring one segment to at least `till`. Returns whether `till` was reached.
    pub fn synchronize_segment(
        &self,
        segment_name: &str,
        till: Option<ChangeNumber>,
    ) -> Result<bool> {
        self.segments.synchronize_segment(segment_name, till)
    }

    /// Kill a split locally. See [`SplitSynchronizer::kill_split`].
    pub fn kill_split(
        &self,
        split_name: &str,
        default_treatment: &str,
        change_number: ChangeNumber,
    ) -> bool {
        self.splits
            .kill_split(split_name, default_treatment, change_number)
    }

    /// Start the split and segment fetching tasks.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a thread could not be spawned.
    pub fn start_periodic_fetching(&self) -> std::io::Result<()> {
        log::info!(target: "splitsync", "starting periodic fetching");
        self.split_task.start()?;
        self.segment_task.start()
    }

    /// Stop the split and segment fetching tasks. With `blocking`, waits for them to stop.
    pub fn stop_periodic_fetching(&self, blocking: bool) {
        log::info!(target: "splitsync", "stopping periodic fetching");
        stop_tasks([&self.split_task, &self.segment_task], blocking);
    }

    /// Start the tasks shipping impressions, events, counters and telemetry.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a thread could not be spawned.
    pub fn start_periodic_data_recording(&self) -> std::io::Result<()> {
        log::info!(target: "splitsync", "starting periodic data recording");
        for task in &self.recording_tasks {
            task.start()?;
        }
        self.telemetry_task.start()
    }

    /// Stop the data recording tasks, which flush what is left. Telemetry is stopped last so that
    /// its final report accounts for the other flushes. With `blocking`, waits for every flush.
    pub fn stop_periodic_data_recording(&self, blocking: bool) {
        log::info!(target: "splitsync", "stopping periodic data recording");
        stop_tasks(self.recording_tasks.iter().map(|task| &**task), blocking);
        stop_tasks([&self.telemetry_task], blocking);
    }

    /// Stop everything: the segment workers, then periodic fetching, then data recording.
    pub fn shutdown(&self, blocking: bool) {
        log::info!(target: "splitsync", blocking; "shutting down synchronization");
        self.stopped.set();

        let workers_done = blocking.then(Signal::new);
        self.segments.shutdown(workers_done.clone());
        if let Some(done) = workers_done {
            done.wait();
        }

        self.stop_periodic_fetching(blocking);
        self.stop_periodic_data_recording(blocking);
    }
}

/// Hook forcing `task` to run out of cycle, as long as it exists.
fn force_run(task: &Arc<PeriodicTask>) -> impl Fn() + Send + Sync + 'static {
    let task: Weak<PeriodicTask> = Arc::downgrade(task);
    move || {
        if let Some(task) = task.upgrade() {
            task.force_run();
        }
    }
}

fn stop_tasks<'a>(tasks: impl IntoIterator<Item = &'a PeriodicTask>, blocking: bool) {
    let mut stopped = Vec::new();
    for task in tasks {
        if blocking {
            let done = Signal::new();
            task.stop(Some(done.clone()));
            stopped.push(done);
        } else {
            task.stop(None);
        }
    }
    for done in stopped {
        done.wait();
    }
}
