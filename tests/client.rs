use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;
use splitsync::{
    api::FetchOptions,
    models::{
        ChangeNumber, Event, Impression, ImpressionCount, SegmentChanges, SplitChanges, UniqueKeys,
    },
    storage::TelemetryStats,
    Backend, Client, ClientConfig, Error, FactoryRegistry, ImpressionsMode,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Splits served by the fake backend: `checkout` (targeting segment `employees`) and `banner`,
/// both at change number 10.
fn split_changes(since: ChangeNumber) -> SplitChanges {
    if since >= 10 {
        return serde_json::from_value(json!({"splits": [], "since": since, "till": since}))
            .unwrap();
    }
    serde_json::from_value(json!({
        "since": since,
        "till": 10,
        "splits": [
            {
                "name": "checkout",
                "trafficTypeName": "user",
                "status": "ACTIVE",
                "changeNumber": 10,
                "defaultTreatment": "off",
                "conditions": [{
                    "matcherGroup": {
                        "matchers": [{
                            "matcherType": "IN_SEGMENT",
                            "userDefinedSegmentMatcherData": {"segmentName": "employees"}
                        }]
                    }
                }]
            },
            {
                "name": "banner",
                "trafficTypeName": "user",
                "status": "ACTIVE",
                "changeNumber": 10,
                "defaultTreatment": "off"
            }
        ]
    }))
    .unwrap()
}

fn segment_changes(name: &str, since: ChangeNumber) -> SegmentChanges {
    let added = if name == "employees" && since < 5 {
        vec!["alice".to_owned(), "bob".to_owned()]
    } else {
        Vec::new()
    };
    let till = if added.is_empty() { since } else { 5 };
    SegmentChanges {
        name: name.to_owned(),
        added,
        removed: Vec::new(),
        since,
        till,
    }
}

#[derive(Default, Clone)]
struct Shipped {
    impressions: Arc<Mutex<Vec<Impression>>>,
    events: Arc<Mutex<Vec<Event>>>,
}

fn backend(shipped: &Shipped) -> Backend {
    let impressions = shipped.impressions.clone();
    let events = shipped.events.clone();
    Backend {
        splits: Arc::new(
            |since: ChangeNumber, _: &FetchOptions| -> splitsync::Result<SplitChanges> {
                Ok(split_changes(since))
            },
        ),
        segments: Arc::new(
            |name: &str,
             since: ChangeNumber,
             _: &FetchOptions|
             -> splitsync::Result<SegmentChanges> { Ok(segment_changes(name, since)) },
        ),
        impressions: Arc::new(move |records: &[Impression]| -> splitsync::Result<()> {
            impressions.lock().unwrap().extend_from_slice(records);
            Ok(())
        }),
        impression_counts: Arc::new(|_: &[ImpressionCount]| -> splitsync::Result<()> { Ok(()) }),
        events: Arc::new(move |records: &[Event]| -> splitsync::Result<()> {
            events.lock().unwrap().extend_from_slice(records);
            Ok(())
        }),
        unique_keys: Arc::new(|_: &[UniqueKeys]| -> splitsync::Result<()> { Ok(()) }),
        telemetry: Arc::new(|_: &[TelemetryStats]| -> splitsync::Result<()> { Ok(()) }),
    }
}

fn config(registry: &Arc<FactoryRegistry>) -> ClientConfig {
    let hour = Duration::from_secs(3600);
    let mut config = ClientConfig::from_api_key("test-api-key");
    config
        .factory_registry(registry.clone())
        .features_refresh_rate(hour)
        .segments_refresh_rate(hour)
        .impressions_refresh_rate(hour)
        .events_push_rate(hour)
        .impression_counts_refresh_rate(hour)
        .unique_keys_refresh_rate(hour)
        .telemetry_refresh_rate(hour)
        .impressions_mode(ImpressionsMode::Debug)
        .segment_workers(2);
    config
}

fn impression(key: &str) -> Impression {
    Impression {
        key_name: key.to_owned(),
        bucketing_key: None,
        feature: "checkout".to_owned(),
        treatment: "on".to_owned(),
        label: "in segment employees".to_owned(),
        change_number: 10,
        time: 1_700_000_000_000,
        previous_time: None,
    }
}

#[test]
fn becomes_ready_with_splits_and_segments() {
    init();
    let registry = Arc::new(FactoryRegistry::new());
    let client = Client::with_backend(config(&registry), backend(&Shipped::default())).unwrap();

    client.block_until_ready(Duration::from_secs(5)).unwrap();

    assert!(client.is_ready());
    let mut names = client.split_names();
    names.sort();
    assert_eq!(names, vec!["banner".to_owned(), "checkout".to_owned()]);
    assert!(client.segment_contains("employees", "alice"));
    assert!(!client.segment_contains("employees", "carol"));

    client.destroy(true);
}

#[test]
fn kill_split_overrides_default_treatment() {
    init();
    let registry = Arc::new(FactoryRegistry::new());
    let client = Client::with_backend(config(&registry), backend(&Shipped::default())).unwrap();
    client.block_until_ready(Duration::from_secs(5)).unwrap();

    assert!(client.kill_split("banner", "hidden", 20));
    let banner = client.split("banner").unwrap();
    assert!(banner.killed);
    assert_eq!(banner.default_treatment, "hidden");

    // Older than the stored collection.
    assert!(!client.kill_split("checkout", "hidden", 5));
    assert!(!client.kill_split("unknown", "hidden", 20));

    client.destroy(true);
}

#[test]
fn destroy_flushes_pending_records() {
    init();
    let registry = Arc::new(FactoryRegistry::new());
    let shipped = Shipped::default();
    let client = Client::with_backend(config(&registry), backend(&shipped)).unwrap();
    client.block_until_ready(Duration::from_secs(5)).unwrap();

    assert!(client.record_impressions(vec![impression("alice"), impression("bob")]));
    assert!(client.track(Event {
        key: "alice".to_owned(),
        traffic_type_name: "user".to_owned(),
        event_type_id: "purchase".to_owned(),
        value: Some(12.5),
        timestamp: 1_700_000_000_000,
        properties: None,
    }));

    client.destroy(true);

    assert_eq!(shipped.impressions.lock().unwrap().len(), 2);
    assert_eq!(shipped.events.lock().unwrap().len(), 1);
}

#[test]
fn destroyed_client_rejects_work() {
    init();
    let registry = Arc::new(FactoryRegistry::new());
    let client = Client::with_backend(config(&registry), backend(&Shipped::default())).unwrap();
    client.block_until_ready(Duration::from_secs(5)).unwrap();

    client.destroy(true);
    client.destroy(true);

    assert!(matches!(
        client.block_until_ready(Duration::from_millis(10)),
        Err(Error::Destroyed)
    ));
    assert!(matches!(client.synchronize_splits(Some(20)), Err(Error::Destroyed)));
    assert!(!client.record_impressions(vec![impression("alice")]));
}

#[test]
fn invalid_api_key_is_reported_by_block_until_ready() {
    init();
    let registry = Arc::new(FactoryRegistry::new());
    let backend = Backend {
        splits: Arc::new(|_: ChangeNumber, _: &FetchOptions| -> splitsync::Result<SplitChanges> {
            Err(Error::Unauthorized)
        }),
        ..backend(&Shipped::default())
    };
    let client = Client::with_backend(config(&registry), backend).unwrap();

    assert!(matches!(
        client.block_until_ready(Duration::from_secs(5)),
        Err(Error::Unauthorized)
    ));
    assert!(!client.is_ready());
}

#[test]
fn clients_are_accounted_in_the_registry() {
    init();
    let registry = Arc::new(FactoryRegistry::new());

    let first = Client::with_backend(config(&registry), backend(&Shipped::default())).unwrap();
    let second = Client::with_backend(config(&registry), backend(&Shipped::default())).unwrap();
    assert_eq!(registry.count("test-api-key"), 2);

    first.destroy(false);
    assert_eq!(registry.count("test-api-key"), 1);

    drop(second);
    assert_eq!(registry.count("test-api-key"), 0);
}
