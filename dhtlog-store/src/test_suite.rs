//! Behaviour every [`MeasurementStore`] backend must share
//!
//! Backends instantiate the whole suite with
//! `store_test_suite!(<expression building a fresh store>)`. The property
//! test at the bottom checks both backends against [`BucketAccumulator`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use dhtlog_core::{BucketAccumulator, BucketWidth, Reading, ReadingBuilder, Timestamp, HUMIDITY, TEMPERATURE};
use proptest::prelude::*;
use tempfile::TempDir;

use crate::{MeasurementStore, MemoryStore, SqliteConfig, SqliteStore};

const MINUTE_MS: u64 = 60_000;

macro_rules! store_test_suite {
    ($new:expr) => {
        #[test]
        fn empty_store_returns_no_buckets() {
            $crate::test_suite::empty_store_returns_no_buckets(std::sync::Arc::new($new));
        }

        #[test]
        fn averages_are_simple_means() {
            $crate::test_suite::averages_are_simple_means(std::sync::Arc::new($new));
        }

        #[test]
        fn missing_metrics_stay_absent() {
            $crate::test_suite::missing_metrics_stay_absent(std::sync::Arc::new($new));
        }

        #[test]
        fn newest_first_and_truncated() {
            $crate::test_suite::newest_first_and_truncated(std::sync::Arc::new($new));
        }

        #[test]
        fn empty_buckets_are_skipped() {
            $crate::test_suite::empty_buckets_are_skipped(std::sync::Arc::new($new));
        }

        #[test]
        fn zero_count_returns_nothing() {
            $crate::test_suite::zero_count_returns_nothing(std::sync::Arc::new($new));
        }

        #[test]
        fn latest_reading_per_source() {
            $crate::test_suite::latest_reading_per_source(std::sync::Arc::new($new));
        }

        #[test]
        fn latest_prefers_newest_observation() {
            $crate::test_suite::latest_prefers_newest_observation(std::sync::Arc::new($new));
        }

        #[test]
        fn widest_width_is_one_bucket() {
            $crate::test_suite::widest_width_is_one_bucket(std::sync::Arc::new($new));
        }

        #[test]
        fn read_after_write_under_concurrent_writers() {
            $crate::test_suite::read_after_write_under_concurrent_writers(std::sync::Arc::new($new));
        }
    };
}

pub(crate) use store_test_suite;

pub(crate) fn temp(source: &str, at: Timestamp, value: f64) -> Reading {
    ReadingBuilder::new(source, at)
        .metric(TEMPERATURE, value)
        .build()
        .unwrap()
}

fn hum(source: &str, at: Timestamp, value: f64) -> Reading {
    ReadingBuilder::new(source, at)
        .metric(HUMIDITY, value)
        .build()
        .unwrap()
}

fn width(seconds: u64) -> BucketWidth {
    BucketWidth::from_seconds(seconds).unwrap()
}

fn assert_close(actual: Option<f64>, expected: f64) {
    match actual {
        Some(actual) => assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        ),
        None => panic!("expected {expected}, got no value"),
    }
}

pub(crate) fn empty_store_returns_no_buckets(store: Arc<dyn MeasurementStore>) {
    assert!(store.is_empty().unwrap());
    for seconds in [60, 3600, 2_592_000] {
        assert!(store.query_range_aggregated(width(seconds), 10).unwrap().is_empty());
    }
    assert!(store.latest_per_source().unwrap().is_empty());
}

pub(crate) fn averages_are_simple_means(store: Arc<dyn MeasurementStore>) {
    store.insert(&temp("A", 0, 10.0)).unwrap();
    store.insert(&temp("A", 30_000, 20.0)).unwrap();

    let buckets = store.query_range_aggregated(width(60), 10).unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].start, 0);
    assert_close(buckets[0].average(&"A".into(), TEMPERATURE), 15.0);
    assert_eq!(buckets[0].sources[&"A".into()][TEMPERATURE].samples, 2);
}

pub(crate) fn missing_metrics_stay_absent(store: Arc<dyn MeasurementStore>) {
    store.insert(&hum("A", 1_000, 40.0)).unwrap();
    store.insert(&temp("B", 2_000, 18.0)).unwrap();
    store.insert(&hum("B", 3_000, 60.0)).unwrap();

    let buckets = store.query_range_aggregated(width(60), 1).unwrap();
    let bucket = &buckets[0];
    assert_eq!(bucket.average(&"A".into(), TEMPERATURE), None);
    assert_close(bucket.average(&"A".into(), HUMIDITY), 40.0);
    assert_close(bucket.average(&"B".into(), TEMPERATURE), 18.0);
    assert_close(bucket.average(&"B".into(), HUMIDITY), 60.0);
}

pub(crate) fn newest_first_and_truncated(store: Arc<dyn MeasurementStore>) {
    for minute in 0..10u64 {
        store.insert(&temp("A", minute * MINUTE_MS + 500, minute as f64)).unwrap();
    }
    assert_eq!(store.len().unwrap(), 10);

    let buckets = store.query_range_aggregated(width(60), 3).unwrap();
    let starts: Vec<_> = buckets.iter().map(|b| b.start).collect();
    assert_eq!(starts, vec![9 * MINUTE_MS, 8 * MINUTE_MS, 7 * MINUTE_MS]);
    assert_close(buckets[0].average(&"A".into(), TEMPERATURE), 9.0);

    // Wider buckets regroup the same rows
    let buckets = store.query_range_aggregated(width(300), 10).unwrap();
    assert_eq!(buckets.len(), 2);
    assert_close(buckets[0].average(&"A".into(), TEMPERATURE), 7.0);
    assert_close(buckets[1].average(&"A".into(), TEMPERATURE), 2.0);
}

pub(crate) fn empty_buckets_are_skipped(store: Arc<dyn MeasurementStore>) {
    store.insert(&temp("A", 0, 1.0)).unwrap();
    store.insert(&temp("A", 10 * MINUTE_MS, 2.0)).unwrap();

    let buckets = store.query_range_aggregated(width(60), 5).unwrap();
    let starts: Vec<_> = buckets.iter().map(|b| b.start).collect();
    assert_eq!(starts, vec![10 * MINUTE_MS, 0]);
}

pub(crate) fn zero_count_returns_nothing(store: Arc<dyn MeasurementStore>) {
    store.insert(&temp("A", 0, 1.0)).unwrap();
    assert!(store.query_range_aggregated(width(60), 0).unwrap().is_empty());
}

pub(crate) fn latest_reading_per_source(store: Arc<dyn MeasurementStore>) {
    store.insert(&temp("A", 1_000, 1.0)).unwrap();
    store.insert(&temp("B", 2_000, 2.0)).unwrap();
    let newest_a = ReadingBuilder::new("A", 3_000)
        .metric(TEMPERATURE, 3.0)
        .metric(HUMIDITY, 55.0)
        .sensor(1)
        .build()
        .unwrap();
    store.insert(&newest_a).unwrap();

    let mut latest = store.latest_per_source().unwrap();
    latest.sort_by(|a, b| a.source_id().cmp(b.source_id()));
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0], newest_a);
    assert_eq!(latest[1].metric(TEMPERATURE), Some(2.0));
}

pub(crate) fn latest_prefers_newest_observation(store: Arc<dyn MeasurementStore>) {
    store.insert(&temp("A", 5_000, 5.0)).unwrap();
    // Appended later but observed earlier
    store.insert(&temp("A", 3_000, 3.0)).unwrap();
    // Same instant: the later append wins
    store.insert(&temp("B", 1_000, 1.0)).unwrap();
    store.insert(&temp("B", 1_000, 2.0)).unwrap();

    let mut latest = store.latest_per_source().unwrap();
    latest.sort_by(|a, b| a.source_id().cmp(b.source_id()));
    assert_eq!(latest[0].metric(TEMPERATURE), Some(5.0));
    assert_eq!(latest[1].metric(TEMPERATURE), Some(2.0));
}

pub(crate) fn widest_width_is_one_bucket(store: Arc<dyn MeasurementStore>) {
    store.insert(&temp("A", 1_000, 10.0)).unwrap();
    store.insert(&temp("A", 1_714_568_400_000, 20.0)).unwrap();

    let widest = BucketWidth::from_seconds(BucketWidth::MAX_SECONDS).unwrap();
    let buckets = store.query_range_aggregated(widest, 5).unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].start, 0);
    assert_close(buckets[0].average(&"A".into(), TEMPERATURE), 15.0);
}

pub(crate) fn read_after_write_under_concurrent_writers(store: Arc<dyn MeasurementStore>) {
    let stop = Arc::new(AtomicBool::new(false));

    let background: Vec<_> = (0..3)
        .map(|n| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let source = format!("noise-{n}");
                let mut i = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let at = (i * 7_919) % (50 * MINUTE_MS);
                    store.insert(&temp(&source, at, i as f64)).unwrap();
                    i += 1;
                }
            })
        })
        .collect();

    for minute in 0..50u64 {
        let value = 100.0 + minute as f64;
        let at = minute * MINUTE_MS + 1_234;
        store.insert(&temp("A", at, value)).unwrap();

        let buckets = store.query_range_aggregated(width(60), 10_000).unwrap();
        let bucket = buckets
            .iter()
            .find(|b| b.start == minute * MINUTE_MS)
            .expect("bucket of the fresh reading");
        assert_close(bucket.average(&"A".into(), TEMPERATURE), value);
    }

    stop.store(true, Ordering::Relaxed);
    for handle in background {
        handle.join().unwrap();
    }
}

/// Random reading over two days with at least one metric present
fn arb_reading() -> impl Strategy<Value = Reading> {
    (
        prop::sample::select(vec!["A", "B", "C"]),
        0..48 * 60 * MINUTE_MS,
        prop::option::of(-400i32..400),
        prop::option::of(0u32..1000),
    )
        .prop_map(|(source, at, temp, hum)| {
            let temp = match (temp, hum) {
                (None, None) => Some(0),
                (temp, _) => temp,
            };
            ReadingBuilder::new(source, at)
                .maybe_metric(TEMPERATURE, temp.map(|t| f64::from(t) / 10.0))
                .maybe_metric(HUMIDITY, hum.map(|h| f64::from(h) / 10.0))
                .build()
                .unwrap()
        })
}

fn matches_reference(
    store: &dyn MeasurementStore,
    readings: &[Reading],
    width: BucketWidth,
    count: usize,
) -> Result<(), TestCaseError> {
    let mut reference = BucketAccumulator::new(width);
    readings.iter().for_each(|r| reference.add(r));
    let expected = reference.finish(count);
    let actual = store.query_range_aggregated(width, count).unwrap();

    prop_assert_eq!(actual.len(), expected.len(), "{} width {}", store.backend(), width);
    for (a, e) in actual.iter().zip(&expected) {
        prop_assert_eq!(a.start, e.start);
        prop_assert_eq!(
            a.sources.keys().collect::<Vec<_>>(),
            e.sources.keys().collect::<Vec<_>>()
        );
        for (source, metrics) in &e.sources {
            for (metric, average) in metrics {
                let mean = a.average(source, metric);
                prop_assert!(
                    mean.is_some_and(|m| (m - average.mean).abs() < 1e-9),
                    "{} {source}/{metric}: expected {}, got {mean:?}",
                    store.backend(),
                    average.mean
                );
                prop_assert_eq!(a.sources[source][metric].samples, average.samples);
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn backends_agree_with_reference_accumulator(
        readings in prop::collection::vec(arb_reading(), 0..200),
        seconds in prop_oneof![
            Just(60u64),
            Just(900),
            Just(3600),
            Just(86_400),
            1u64..200_000,
        ],
        count in 0usize..60,
    ) {
        let dir = TempDir::new().unwrap();
        let sqlite = SqliteStore::open(&SqliteConfig::new(dir.path().join("dht.db"))).unwrap();
        let memory = MemoryStore::new();
        for reading in &readings {
            sqlite.insert(reading).unwrap();
            memory.insert(reading).unwrap();
        }

        let width = width(seconds);
        matches_reference(&sqlite, &readings, width, count)?;
        matches_reference(&memory, &readings, width, count)?;
    }
}
