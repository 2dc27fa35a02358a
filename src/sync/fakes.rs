//! Scripted backend fakes for synchronizer tests.
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use crate::{
    api::{FetchOptions, SegmentFetcher, SplitFetcher},
    impressions::{ImpressionsCounter, UniqueKeysTracker},
    models::{
        ChangeNumber, Condition, Event, Impression, ImpressionCount, Matcher, MatcherGroup,
        SegmentChanges, SegmentMatcherData, Split, SplitChanges, SplitStatus, TryParse,
        UniqueKeys,
    },
    storage::{
        BoundedQueue, InMemorySegmentStorage, InMemorySplitStorage, TelemetryStats,
        TelemetryStorage,
    },
    sync::{
        FetchRetryConfig, ImpressionCountSynchronizer, Readiness, RecordSynchronizer,
        SegmentSynchronizer, SplitSynchronizer, SyncPeriods, Synchronizer, Synchronizers,
        TelemetrySynchronizer, UniqueKeysSynchronizer,
    },
    Error, Result,
};

pub fn split(name: &str, status: SplitStatus, change_number: ChangeNumber) -> Split {
    Split {
        name: name.to_owned(),
        traffic_type_name: "user".to_owned(),
        status,
        change_number,
        killed: false,
        default_treatment: "off".to_owned(),
        conditions: Vec::new(),
        extra: HashMap::new(),
    }
}

pub fn split_in_segment(name: &str, segment: &str, change_number: ChangeNumber) -> Split {
    Split {
        conditions: vec![Condition {
            matcher_group: MatcherGroup {
                matchers: vec![Matcher {
                    matcher_type: "IN_SEGMENT".to_owned(),
                    user_defined_segment_matcher_data: Some(SegmentMatcherData {
                        segment_name: segment.to_owned(),
                    }),
                    extra: HashMap::new(),
                }],
                extra: HashMap::new(),
            },
            extra: HashMap::new(),
        }],
        ..split(name, SplitStatus::Active, change_number)
    }
}

pub fn page(splits: Vec<Split>, since: ChangeNumber, till: ChangeNumber) -> SplitChanges {
    SplitChanges {
        splits: splits.into_iter().map(TryParse::Parsed).collect(),
        since,
        till,
    }
}

pub fn segment_page(
    name: &str,
    added: &[&str],
    removed: &[&str],
    since: ChangeNumber,
    till: ChangeNumber,
) -> SegmentChanges {
    SegmentChanges {
        name: name.to_owned(),
        added: added.iter().map(|key| key.to_string()).collect(),
        removed: removed.iter().map(|key| key.to_string()).collect(),
        since,
        till,
    }
}

/// Serves scripted responses in order. Once the script is exhausted, answers with an empty page
/// that confirms the requested `since`.
#[derive(Default)]
pub struct ScriptedSplits {
    script: Mutex<VecDeque<Result<SplitChanges>>>,
    calls: Mutex<Vec<(ChangeNumber, FetchOptions)>>,
}

impl ScriptedSplits {
    pub fn new(script: impl IntoIterator<Item = Result<SplitChanges>>) -> ScriptedSplits {
        ScriptedSplits {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<(ChangeNumber, FetchOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SplitFetcher for ScriptedSplits {
    fn fetch(&self, since: ChangeNumber, options: &FetchOptions) -> Result<SplitChanges> {
        self.calls.lock().unwrap().push((since, options.clone()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(page(Vec::new(), since, since)))
    }
}

/// Per-segment version of [`ScriptedSplits`].
#[derive(Default)]
pub struct ScriptedSegments {
    scripts: Mutex<HashMap<String, VecDeque<Result<SegmentChanges>>>>,
    calls: Mutex<Vec<(String, ChangeNumber, FetchOptions)>>,
}

impl ScriptedSegments {
    pub fn new() -> ScriptedSegments {
        ScriptedSegments::default()
    }

    pub fn script(&self, name: &str, responses: impl IntoIterator<Item = Result<SegmentChanges>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(name.to_owned())
            .or_default()
            .extend(responses);
    }

    pub fn calls(&self) -> Vec<(String, ChangeNumber, FetchOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(segment, _, _)| segment == name)
            .count()
    }
}

impl SegmentFetcher for ScriptedSegments {
    fn fetch(
        &self,
        segment_name: &str,
        since: ChangeNumber,
        options: &FetchOptions,
    ) -> Result<SegmentChanges> {
        self.calls
            .lock()
            .unwrap()
            .push((segment_name.to_owned(), since, options.clone()));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(segment_name)
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Ok(segment_page(segment_name, &[], &[], since, since)))
    }
}

pub struct Fixture {
    pub synchronizer: Synchronizer,
    pub split_storage: Arc<InMemorySplitStorage>,
    pub segment_storage: Arc<InMemorySegmentStorage>,
    pub impressions: Arc<BoundedQueue<Impression>>,
    pub shipped_impressions: Arc<Mutex<Vec<Impression>>>,
    pub telemetry_reports: Arc<AtomicUsize>,
    pub readiness: Arc<Readiness>,
}

pub fn idle_periods() -> SyncPeriods {
    let hour = Duration::from_secs(3600);
    SyncPeriods {
        splits: hour,
        segments: hour,
        impressions: hour,
        events: hour,
        impression_counts: hour,
        unique_keys: hour,
        telemetry: hour,
        fetch_jitter: Duration::ZERO,
    }
}

pub fn fixture(
    split_fetcher: Arc<dyn SplitFetcher>,
    impressions_capacity: usize,
    periods: SyncPeriods,
) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let retries = FetchRetryConfig {
        backoff_base: Duration::ZERO,
        backoff_max_wait: Duration::ZERO,
        max_attempts: 2,
    };
    let split_storage = Arc::new(InMemorySplitStorage::new());
    let segment_storage = Arc::new(InMemorySegmentStorage::new());
    let impressions = Arc::new(BoundedQueue::new("impressions", impressions_capacity));
    let shipped_impressions = Arc::new(Mutex::new(Vec::new()));
    let telemetry_reports = Arc::new(AtomicUsize::new(0));
    let readiness = Arc::new(Readiness::new());

    let synchronizers = Synchronizers {
        splits: Arc::new(SplitSynchronizer::new(
            split_fetcher,
            split_storage.clone(),
            retries.clone(),
        )),
        segments: Arc::new(
            SegmentSynchronizer::new(
                Arc::new(ScriptedSegments::new()),
                segment_storage.clone(),
                split_storage.clone(),
                retries,
                2,
            )
            .unwrap(),
        ),
        impressions: Arc::new(RecordSynchronizer::new(
            "impressions",
            impressions.clone(),
            {
                let shipped = shipped_impressions.clone();
                Arc::new(move |records: &[Impression]| -> Result<()> {
                    shipped.lock().unwrap().extend_from_slice(records);
                    Ok(())
                })
            },
            10,
        )),
        events: Arc::new(RecordSynchronizer::new(
            "events",
            Arc::new(BoundedQueue::new("events", 10)),
            Arc::new(|_: &[Event]| -> Result<()> { Ok(()) }),
            10,
        )),
        impression_counts: Arc::new(ImpressionCountSynchronizer::new(
            Arc::new(ImpressionsCounter::new()),
            Arc::new(|_: &[ImpressionCount]| -> Result<()> { Ok(()) }),
        )),
        unique_keys: Arc::new(UniqueKeysSynchronizer::new(
            Arc::new(UniqueKeysTracker::new(10)),
            Arc::new(|_: &[UniqueKeys]| -> Result<()> { Ok(()) }),
            10,
        )),
        telemetry: Arc::new(TelemetrySynchronizer::new(
            Arc::new(TelemetryStorage::new()),
            {
                let reports = telemetry_reports.clone();
                Arc::new(move |_: &[TelemetryStats]| -> Result<()> {
                    reports.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            },
        )),
    };

    Fixture {
        synchronizer: Synchronizer::new(synchronizers, &periods, readiness.clone())
            .with_sync_all_backoff(Duration::ZERO, Duration::ZERO),
        split_storage,
        segment_storage,
        impressions,
        shipped_impressions,
        telemetry_reports,
        readiness,
    }
}

pub fn counting_fetcher(
    calls: Arc<AtomicUsize>,
    error: Error,
) -> Arc<dyn SplitFetcher> {
    Arc::new(
        move |_: ChangeNumber, _: &FetchOptions| -> Result<SplitChanges> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(error.clone())
        },
    )
}

pub fn impression(key: &str) -> Impression {
    Impression {
        key_name: key.to_owned(),
        bucketing_key: None,
        feature: "checkout".to_owned(),
        treatment: "on".to_owned(),
        label: "default rule".to_owned(),
        change_number: 100,
        time: 1_700_000_000_000,
        previous_time: None,
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
