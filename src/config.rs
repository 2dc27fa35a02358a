use std::{sync::Arc, time::Duration};

use crate::{
    impressions::ImpressionsMode,
    registry::FactoryRegistry,
    sync::{FetchRetryConfig, SyncPeriods},
    Client, Result,
};

/// Configuration for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) sdk_url: String,
    pub(crate) events_url: String,
    pub(crate) telemetry_url: String,
    pub(crate) periods: SyncPeriods,
    pub(crate) fetch_retry: FetchRetryConfig,
    pub(crate) sync_all_max_retries: Option<u32>,
    pub(crate) segment_workers: usize,
    pub(crate) impressions_mode: ImpressionsMode,
    pub(crate) impressions_queue_size: usize,
    pub(crate) impressions_bulk_size: usize,
    pub(crate) events_queue_size: usize,
    pub(crate) events_bulk_size: usize,
    pub(crate) unique_keys_cache_size: usize,
    pub(crate) unique_keys_bulk_size: usize,
    pub(crate) registry: Arc<FactoryRegistry>,
}

impl ClientConfig {
    /// Default base URL for split and segment changes.
    pub const DEFAULT_SDK_URL: &'static str = "https://sdk.split.io/api";
    /// Default base URL for impressions and events.
    pub const DEFAULT_EVENTS_URL: &'static str = "https://events.split.io/api";
    /// Default base URL for telemetry and unique keys.
    pub const DEFAULT_TELEMETRY_URL: &'static str = "https://telemetry.split.io/api";

    /// Default capacity of the impressions and events queues.
    pub const DEFAULT_QUEUE_SIZE: usize = 10_000;
    /// Default maximum number of records shipped in a single request.
    pub const DEFAULT_BULK_SIZE: usize = 5_000;
    /// Default number of keys the unique keys tracker holds before flushing.
    pub const DEFAULT_UNIQUE_KEYS_CACHE_SIZE: usize = 30_000;

    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use splitsync::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            sdk_url: ClientConfig::DEFAULT_SDK_URL.to_owned(),
            events_url: ClientConfig::DEFAULT_EVENTS_URL.to_owned(),
            telemetry_url: ClientConfig::DEFAULT_TELEMETRY_URL.to_owned(),
            periods: SyncPeriods::default(),
            fetch_retry: FetchRetryConfig::default(),
            sync_all_max_retries: None,
            segment_workers: crate::sync::SegmentSynchronizer::DEFAULT_WORKERS,
            impressions_mode: ImpressionsMode::default(),
            impressions_queue_size: ClientConfig::DEFAULT_QUEUE_SIZE,
            impressions_bulk_size: ClientConfig::DEFAULT_BULK_SIZE,
            events_queue_size: ClientConfig::DEFAULT_QUEUE_SIZE,
            events_bulk_size: ClientConfig::DEFAULT_BULK_SIZE,
            unique_keys_cache_size: ClientConfig::DEFAULT_UNIQUE_KEYS_CACHE_SIZE,
            unique_keys_bulk_size: ClientConfig::DEFAULT_BULK_SIZE,
            registry: FactoryRegistry::global(),
        }
    }

    /// Override base URL of split and segment changes. Clients should use the default setting in
    /// most cases.
    pub fn sdk_url(&mut self, sdk_url: impl Into<String>) -> &mut Self {
        self.sdk_url = sdk_url.into();
        self
    }

    /// Override base URL where impressions and events are shipped.
    pub fn events_url(&mut self, events_url: impl Into<String>) -> &mut Self {
        self.events_url = events_url.into();
        self
    }

    /// Override base URL where telemetry and unique keys are shipped.
    pub fn telemetry_url(&mut self, telemetry_url: impl Into<String>) -> &mut Self {
        self.telemetry_url = telemetry_url.into();
        self
    }

    /// How often splits are fetched.
    pub fn features_refresh_rate(&mut self, period: Duration) -> &mut Self {
        self.periods.splits = period;
        self
    }

    /// How often segments are fetched.
    pub fn segments_refresh_rate(&mut self, period: Duration) -> &mut Self {
        self.periods.segments = period;
        self
    }

    /// How often impressions are shipped.
    pub fn impressions_refresh_rate(&mut self, period: Duration) -> &mut Self {
        self.periods.impressions = period;
        self
    }

    /// How often events are shipped.
    pub fn events_push_rate(&mut self, period: Duration) -> &mut Self {
        self.periods.events = period;
        self
    }

    /// How often impression counts are shipped.
    pub fn impression_counts_refresh_rate(&mut self, period: Duration) -> &mut Self {
        self.periods.impression_counts = period;
        self
    }

    /// How often unique keys are shipped.
    pub fn unique_keys_refresh_rate(&mut self, period: Duration) -> &mut Self {
        self.periods.unique_keys = period;
        self
    }

    /// How often telemetry is shipped.
    pub fn telemetry_refresh_rate(&mut self, period: Duration) -> &mut Self {
        self.periods.telemetry = period;
        self
    }

    /// Shorten each split and segment fetch period by a random duration of up to `jitter`, so that
    /// many processes started together do not hit the backend at the same moment.
    pub fn fetch_jitter(&mut self, jitter: Duration) -> &mut Self {
        self.periods.fetch_jitter = jitter;
        self
    }

    /// Retry policy of on-demand fetches targeting a change number.
    pub fn fetch_retry(&mut self, fetch_retry: FetchRetryConfig) -> &mut Self {
        self.fetch_retry = fetch_retry;
        self
    }

    /// How many times the initial synchronization is retried before the client starts in degraded
    /// mode. `None` (the default) retries forever.
    pub fn sync_all_max_retries(&mut self, max_retries: Option<u32>) -> &mut Self {
        self.sync_all_max_retries = max_retries;
        self
    }

    /// Number of threads fetching segments concurrently.
    pub fn segment_workers(&mut self, workers: usize) -> &mut Self {
        self.segment_workers = workers;
        self
    }

    /// Which impressions are shipped individually. See [`ImpressionsMode`].
    pub fn impressions_mode(&mut self, mode: ImpressionsMode) -> &mut Self {
        self.impressions_mode = mode;
        self
    }

    /// Capacity of the impressions queue. Impressions are dropped once it is full.
    pub fn impressions_queue_size(&mut self, size: usize) -> &mut Self {
        self.impressions_queue_size = size;
        self
    }

    /// Maximum number of impressions shipped in a single request.
    pub fn impressions_bulk_size(&mut self, size: usize) -> &mut Self {
        self.impressions_bulk_size = size;
        self
    }

    /// Capacity of the events queue. Events are dropped once it is full.
    pub fn events_queue_size(&mut self, size: usize) -> &mut Self {
        self.events_queue_size = size;
        self
    }

    /// Maximum number of events shipped in a single request.
    pub fn events_bulk_size(&mut self, size: usize) -> &mut Self {
        self.events_bulk_size = size;
        self
    }

    /// Number of keys tracked before the unique keys are shipped ahead of schedule.
    pub fn unique_keys_cache_size(&mut self, size: usize) -> &mut Self {
        self.unique_keys_cache_size = size;
        self
    }

    /// Maximum number of keys shipped in a single request.
    pub fn unique_keys_bulk_size(&mut self, size: usize) -> &mut Self {
        self.unique_keys_bulk_size = size;
        self
    }

    /// Account clients in `registry` instead of the process-wide [`FactoryRegistry::global`].
    pub fn factory_registry(&mut self, registry: Arc<FactoryRegistry>) -> &mut Self {
        self.registry = registry;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// The client starts synchronizing in the background right away.
    ///
    /// ```no_run
    /// # use splitsync::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client()?;
    /// # Ok::<(), splitsync::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Client::new`].
    pub fn to_client(&self) -> Result<Client> {
        Client::new(self.clone())
    }
}
