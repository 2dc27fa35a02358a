use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    api::{HttpApi, HttpApiConfig, RecordSender, SegmentFetcher, SplitFetcher},
    impressions::{ImpressionsCounter, ImpressionsManager, UniqueKeysTracker},
    models::{ChangeNumber, Event, Impression, ImpressionCount, Split, UniqueKeys},
    registry::FactoryRegistry,
    storage::{
        BoundedQueue, InMemorySegmentStorage, InMemorySplitStorage, SegmentStorage, SplitStorage,
        TelemetryStats, TelemetryStorage,
    },
    sync::{
        ImpressionCountSynchronizer, Manager, Readiness, RecordSynchronizer, SegmentSynchronizer,
        SplitSynchronizer, Status, Synchronizer, Synchronizers, TelemetrySynchronizer,
        UniqueKeysSynchronizer,
    },
    ClientConfig, Error, Result,
};

/// Everything the client needs from the backend: fetching changes and shipping records.
///
/// [`Backend::http`] talks to the real backend. Any other implementation (including plain
/// closures) can be plugged in with [`Client::with_backend`].
#[derive(Clone)]
pub struct Backend {
    /// Fetches split changes.
    pub splits: Arc<dyn SplitFetcher>,
    /// Fetches segment changes.
    pub segments: Arc<dyn SegmentFetcher>,
    /// Ships impressions.
    pub impressions: Arc<dyn RecordSender<Impression>>,
    /// Ships hourly impression counts.
    pub impression_counts: Arc<dyn RecordSender<ImpressionCount>>,
    /// Ships events.
    pub events: Arc<dyn RecordSender<Event>>,
    /// Ships unique keys.
    pub unique_keys: Arc<dyn RecordSender<UniqueKeys>>,
    /// Ships telemetry snapshots.
    pub telemetry: Arc<dyn RecordSender<TelemetryStats>>,
}

impl Backend {
    /// Use `api` for every backend interaction.
    pub fn http(api: HttpApi) -> Backend {
        let api = Arc::new(api);
        Backend {
            splits: api.clone(),
            segments: api.clone(),
            impressions: api.clone(),
            impression_counts: api.clone(),
            events: api.clone(),
            unique_keys: api.clone(),
            telemetry: api,
        }
    }
}

/// A client keeping a local snapshot of feature flags and segments in sync with the backend, and
/// shipping impressions, events and telemetry back to it.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```no_run
/// # use std::time::Duration;
/// # use splitsync::{ClientConfig, Client};
/// let client = Client::new(ClientConfig::from_api_key("api-key"))?;
/// client.block_until_ready(Duration::from_secs(10))?;
/// let names = client.split_names();
/// client.destroy(true);
/// # Ok::<(), splitsync::Error>(())
/// ```
pub struct Client {
    api_key: String,
    registry: Arc<FactoryRegistry>,
    split_storage: Arc<InMemorySplitStorage>,
    segment_storage: Arc<InMemorySegmentStorage>,
    impressions: ImpressionsManager,
    impressions_queue: Arc<BoundedQueue<Impression>>,
    events_queue: Arc<BoundedQueue<Event>>,
    telemetry: Arc<TelemetryStorage>,
    synchronizer: Arc<Synchronizer>,
    manager: Arc<Manager>,
    readiness: Arc<Readiness>,
    destroyed: AtomicBool,
}

impl Client {
    /// Create a new client talking to the backend over HTTP, and start synchronizing in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if a configured URL is invalid and [`Error::Io`] if a
    /// background thread could not be spawned.
    pub fn new(config: ClientConfig) -> Result<Client> {
        let telemetry = Arc::new(TelemetryStorage::new());
        let api = HttpApi::new(
            HttpApiConfig {
                api_key: config.api_key.clone(),
                sdk_url: config.sdk_url.clone(),
                events_url: config.events_url.clone(),
                telemetry_url: config.telemetry_url.clone(),
            },
            Arc::clone(&telemetry),
        )?;
        Client::build(config, Backend::http(api), telemetry)
    }

    /// Create a new client using `backend` instead of HTTP. URLs of `config` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a background thread could not be spawned.
    pub fn with_backend(config: ClientConfig, backend: Backend) -> Result<Client> {
        Client::build(config, backend, Arc::new(TelemetryStorage::new()))
    }

    fn build(
        config: ClientConfig,
        backend: Backend,
        telemetry: Arc<TelemetryStorage>,
    ) -> Result<Client> {
        let split_storage = Arc::new(InMemorySplitStorage::new());
        let segment_storage = Arc::new(InMemorySegmentStorage::new());
        let impressions_queue = Arc::new(BoundedQueue::new(
            "impressions",
            config.impressions_queue_size,
        ));
        let events_queue = Arc::new(BoundedQueue::new("events", config.events_queue_size));
        let counter = Arc::new(ImpressionsCounter::new());
        let unique_keys = Arc::new(UniqueKeysTracker::new(config.unique_keys_cache_size));

        let synchronizers = Synchronizers {
            splits: Arc::new(SplitSynchronizer::new(
                backend.splits,
                split_storage.clone(),
                config.fetch_retry.clone(),
            )),
            segments: Arc::new(SegmentSynchronizer::new(
                backend.segments,
                segment_storage.clone(),
                split_storage.clone(),
                config.fetch_retry.clone(),
                config.segment_workers,
            )?),
            impressions: Arc::new(RecordSynchronizer::new(
                "impressions",
                impressions_queue.clone(),
                backend.impressions,
                config.impressions_bulk_size,
            )),
            events: Arc::new(RecordSynchronizer::new(
                "events",
                events_queue.clone(),
                backend.events,
                config.events_bulk_size,
            )),
            impression_counts: Arc::new(ImpressionCountSynchronizer::new(
                counter.clone(),
                backend.impression_counts,
            )),
            unique_keys: Arc::new(UniqueKeysSynchronizer::new(
                unique_keys.clone(),
                backend.unique_keys,
                config.unique_keys_bulk_size,
            )),
            telemetry: Arc::new(TelemetrySynchronizer::new(
                telemetry.clone(),
                backend.telemetry,
            )),
        };

        let readiness = Arc::new(Readiness::new());
        let synchronizer = Arc::new(Synchronizer::new(
            synchronizers,
            &config.periods,
            readiness.clone(),
        ));
        let manager = Arc::new(Manager::new(
            synchronizer.clone(),
            readiness.clone(),
            config.sync_all_max_retries,
        ));

        config.registry.increment(&config.api_key);
        telemetry.record_active_factories(config.registry.active_count() as u64);

        let client = Client {
            api_key: config.api_key,
            registry: config.registry,
            split_storage,
            segment_storage,
            impressions: ImpressionsManager::new(config.impressions_mode, counter, unique_keys),
            impressions_queue,
            events_queue,
            telemetry,
            synchronizer,
            manager: manager.clone(),
            readiness: readiness.clone(),
            destroyed: AtomicBool::new(false),
        };

        let init = std::thread::Builder::new()
            .name("splitsync-init".to_owned())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| manager.start()))
                    .unwrap_or(Err(Error::ThreadPanicked));
                if let Err(err) = result {
                    log::error!(target: "splitsync", "client failed to start: {err}");
                    readiness.fail(err);
                }
            });
        if let Err(err) = init {
            client.destroy(false);
            return Err(err.into());
        }

        Ok(client)
    }

    /// Wait until the initial synchronization completes.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the client is not ready after `timeout`. Synchronization keeps
    ///   going in the background, so waiting again may succeed.
    /// - The error that stopped the client from starting, e.g. [`Error::Unauthorized`].
    /// - [`Error::Destroyed`] if the client has been destroyed.
    pub fn block_until_ready(&self, timeout: Duration) -> Result<()> {
        self.readiness.wait(timeout)
    }

    /// Returns `true` once the initial synchronization has completed.
    pub fn is_ready(&self) -> bool {
        self.readiness.status() == Status::Ready
    }

    /// Queue impressions for shipping, according to the configured impressions mode.
    ///
    /// Returns `false` if some impressions were dropped because the queue was full, or if the
    /// client has been destroyed.
    pub fn record_impressions(&self, impressions: Vec<Impression>) -> bool {
        if self.is_destroyed() {
            log::warn!(target: "splitsync", "recording impressions on a destroyed client");
            return false;
        }

        let processed = self.impressions.process(impressions);
        let outcome = self.impressions_queue.put(processed.to_queue);
        self.telemetry
            .record_impressions(outcome.queued, processed.deduped, outcome.dropped);
        outcome.dropped == 0
    }

    /// Queue an event for shipping.
    ///
    /// Returns `false` if the event was dropped.
    pub fn track(&self, event: Event) -> bool {
        if self.is_destroyed() {
            log::warn!(target: "splitsync", event_type = event.event_type_id.as_str(); "tracking an event on a destroyed client");
            return false;
        }

        let outcome = self.events_queue.put([event]);
        self.telemetry.record_events(outcome.queued, outcome.dropped);
        outcome.dropped == 0
    }

    /// Synchronize splits up to `till`, then schedule synchronization of newly referenced
    /// segments. Meant to be called when a change notification arrives.
    ///
    /// Returns `false` if `till` could not be reached.
    pub fn synchronize_splits(&self, till: Option<ChangeNumber>) -> Result<bool> {
        self.manager.ensure_running()?;
        self.synchronizer.synchronize_splits(till, true)
    }

    /// Synchronize a single segment up to `till`.
    pub fn synchronize_segment(
        &self,
        segment_name: &str,
        till: Option<ChangeNumber>,
    ) -> Result<bool> {
        self.manager.ensure_running()?;
        self.synchronizer.synchronize_segment(segment_name, till)
    }

    /// Kill a split locally until the next fetch brings the change in.
    ///
    /// Returns `false` if nothing was changed.
    pub fn kill_split(
        &self,
        split_name: &str,
        default_treatment: &str,
        change_number: ChangeNumber,
    ) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.synchronizer
            .kill_split(split_name, default_treatment, change_number)
    }

    /// Returns the stored definition of split `name`.
    pub fn split(&self, name: &str) -> Option<Arc<Split>> {
        self.split_storage.get(name)
    }

    /// Returns the names of every stored split.
    pub fn split_names(&self) -> Vec<String> {
        self.split_storage.get_split_names()
    }

    /// Returns `true` if `key` belongs to `segment_name` in the local snapshot.
    pub fn segment_contains(&self, segment_name: &str, key: &str) -> bool {
        self.segment_storage.segment_contains(segment_name, key)
    }

    /// Stop every background activity. If `blocking`, wait until pending records are flushed.
    ///
    /// Calling it more than once does nothing.
    pub fn destroy(&self, blocking: bool) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!(target: "splitsync", blocking; "destroying client");
        self.manager.stop(blocking);
        self.registry.decrement(&self.api_key);
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.destroy(false);
    }
}
