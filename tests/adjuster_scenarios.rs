//! End-to-end adjustment scenarios across consecutive scrapes.

mod common;

use common::{hours_ago, t, wall, TestScrape, HOUR, INSTANCE, JOB};
use pretty_assertions::assert_eq;
use prom_sidecar::adjuster::Adjuster;
use prom_sidecar::core::{AdjustmentMode, ConfigBuilder, FallbackScope};
use prom_sidecar::metrics::{
    AdjustedBatch, AdjustmentOutcome, LabelSet, MetricKind, SamplePayload, ScrapeBatch,
    ScrapedMetric, ScrapedSample, Timestamp,
};
use std::time::Duration;

fn initial_point() -> Adjuster {
    let config = ConfigBuilder::new()
        .mode(AdjustmentMode::InitialPoint)
        .build()
        .unwrap();
    Adjuster::from_config(&config).unwrap()
}

fn start_time_metric() -> Adjuster {
    Adjuster::from_config(&ConfigBuilder::new().build().unwrap()).unwrap()
}

fn start_of(batch: &AdjustedBatch, name: &str) -> Timestamp {
    batch
        .points_named(name)
        .next()
        .unwrap_or_else(|| panic!("Expected a point for {}", name))
        .start_timestamp
}

fn after(ts: Timestamp, hours: u64) -> Timestamp {
    ts.saturating_add(Duration::from_secs(hours * HOUR))
}

#[test]
fn test_initial_point_sum_with_reset() {
    let adjuster = initial_point();
    let t1 = t(126);
    let t2 = after(t1, 1);
    let t3 = after(t2, 1);
    let t4 = after(t3, 1);

    let mut starts = Vec::new();
    for (ts, value) in [(t1, 44.0), (t2, 66.0), (t3, 55.0), (t4, 72.0)] {
        let out = adjuster.adjust_at(&TestScrape::at(ts).counter("test_sum", value).build(), wall(ts));
        starts.push(start_of(&out, "test_sum"));
    }

    assert_eq!(starts, vec![t1, t1, t3, t3]);
}

#[test]
fn test_fallback_start_time_for_consecutive_scrapes() {
    let mock = hours_ago(10);
    let adjuster = start_time_metric().with_fallback_start_time(mock);
    let t1 = Timestamp::from_system_time(hours_ago(2));
    let t2 = after(t1, 1);

    let first = adjuster.adjust_at(&TestScrape::at(t1).counter("test_sum", 10.0).build(), wall(t1));
    let second = adjuster.adjust_at(&TestScrape::at(t2).counter("test_sum", 20.0).build(), wall(t2));

    let expected = Timestamp::from_system_time(mock);
    assert_eq!(start_of(&first, "test_sum"), expected);
    assert_eq!(start_of(&second, "test_sum"), expected);
    assert_eq!(second.report.resolved_start, Some(expected));
}

#[test]
fn test_fallback_with_cumulative_reset() {
    let mock = hours_ago(10);
    let adjuster = start_time_metric().with_fallback_start_time(mock);
    let t1 = Timestamp::from_system_time(hours_ago(6));
    let t2 = after(t1, 1);
    let t3 = after(t2, 1);
    let t4 = after(t3, 1);
    let t5 = after(t4, 1);

    let mut starts = Vec::new();
    for (ts, value) in [(t1, 44.0), (t2, 66.0), (t3, 55.0), (t4, 72.0), (t5, 72.0)] {
        let out = adjuster.adjust_at(&TestScrape::at(ts).counter("test_sum", value).build(), wall(ts));
        starts.push(start_of(&out, "test_sum"));
    }

    let mock = Timestamp::from_system_time(mock);
    assert_eq!(starts, vec![mock, mock, t3, t3, t3]);
}

#[test]
fn test_fallback_summary_reset_on_count() {
    let mock = hours_ago(10);
    let adjuster = start_time_metric().with_fallback_start_time(mock);
    let t1 = Timestamp::from_system_time(hours_ago(5));
    let t2 = after(t1, 1);
    let t3 = after(t2, 1);
    let t4 = after(t3, 1);

    let mut starts = Vec::new();
    for (ts, count, sum) in [(t1, 10, 40.0), (t2, 15, 70.0), (t3, 12, 66.0), (t4, 14, 80.0)] {
        let scrape = TestScrape::at(ts)
            .summary("test_summary", count, sum, &[(0.5, 1.0), (0.99, 8.0)])
            .build();
        starts.push(start_of(&adjuster.adjust_at(&scrape, wall(ts)), "test_summary"));
    }

    let mock = Timestamp::from_system_time(mock);
    assert_eq!(starts, vec![mock, mock, t3, t3]);
}

#[test]
fn test_histogram_reset_on_total_count() {
    let adjuster = initial_point();
    let bounds = [1.0, 5.0, 10.0];
    let t1 = t(1_000);
    let t2 = after(t1, 1);
    let t3 = after(t2, 1);

    let mut starts = Vec::new();
    let mut outcomes = Vec::new();
    for (ts, buckets) in [(t1, [4u64, 2, 3, 7]), (t2, [6, 5, 6, 8]), (t3, [2, 2, 3, 7])] {
        let scrape = TestScrape::at(ts).histogram("test_histogram", &bounds, &buckets, 10.0).build();
        let out = adjuster.adjust_at(&scrape, wall(ts));
        let point = out.points_named("test_histogram").next().unwrap().clone();
        starts.push(point.start_timestamp);
        outcomes.push(point.outcome);
    }

    assert_eq!(starts, vec![t1, t1, t3]);
    assert_eq!(
        outcomes,
        vec![
            AdjustmentOutcome::Established,
            AdjustmentOutcome::Tracked,
            AdjustmentOutcome::Reset
        ]
    );
}

#[test]
fn test_bucket_layout_change_is_not_a_reset() {
    let adjuster = initial_point();
    let t1 = t(1_000);
    let t2 = t(2_000);

    adjuster.adjust_at(
        &TestScrape::at(t1).histogram("h", &[1.0, 2.0], &[1, 1, 1], 3.0).build(),
        wall(t1),
    );
    let out = adjuster.adjust_at(
        &TestScrape::at(t2).histogram("h", &[5.0], &[2, 2], 4.0).build(),
        wall(t2),
    );
    assert_eq!(start_of(&out, "h"), t1);
}

#[test]
fn test_gauge_start_is_its_own_timestamp() {
    for adjuster in [initial_point(), start_time_metric()] {
        for (secs, value) in [(100, 44.0), (200, 66.0), (300, 12.0)] {
            let ts = t(secs);
            let out = adjuster.adjust_at(&TestScrape::at(ts).gauge("test_gauge", value).build(), wall(ts));
            let point = out.points_named("test_gauge").next().unwrap();
            assert_eq!(point.start_timestamp, ts);
            assert_eq!(point.outcome, AdjustmentOutcome::Gauge);
        }
        assert!(adjuster.cache().is_empty());
    }
}

#[test]
fn test_plateau_is_not_a_reset() {
    let adjuster = initial_point();
    for secs in [100, 200, 300, 400] {
        let ts = t(secs);
        let out = adjuster.adjust_at(&TestScrape::at(ts).counter("flat_total", 7.0).build(), wall(ts));
        assert_eq!(start_of(&out, "flat_total"), t(100));
        assert_eq!(out.report.resets, 0);
    }
}

#[test]
fn test_start_time_constant_without_decrease() {
    let adjuster = start_time_metric();
    let mut starts = Vec::new();
    for (i, value) in [1.0, 5.0, 5.0, 9.0, 100.0].into_iter().enumerate() {
        let ts = t(10_000 + i as u64 * 60);
        let scrape = TestScrape::at(ts)
            .process_start(9_000)
            .counter("requests_total", value)
            .build();
        starts.push(start_of(&adjuster.adjust_at(&scrape, wall(ts)), "requests_total"));
    }
    assert!(starts.iter().all(|s| *s == t(9_000)));
}

#[test]
fn test_start_time_metric_change_is_adopted() {
    let adjuster = start_time_metric();
    let t1 = t(10_000);
    let t2 = t(10_060);
    let t3 = t(10_120);

    adjuster.adjust_at(
        &TestScrape::at(t1).process_start(9_000).counter("requests_total", 50.0).build(),
        wall(t1),
    );
    // Process restarted between scrapes, counter already past its old value
    let out = adjuster.adjust_at(
        &TestScrape::at(t2).process_start(10_030).counter("requests_total", 60.0).build(),
        wall(t2),
    );
    let point = out.points_named("requests_total").next().unwrap();
    assert_eq!(point.start_timestamp, t(10_030));
    assert_eq!(point.outcome, AdjustmentOutcome::Restarted);

    let out = adjuster.adjust_at(
        &TestScrape::at(t3).process_start(10_030).counter("requests_total", 61.0).build(),
        wall(t3),
    );
    assert_eq!(start_of(&out, "requests_total"), t(10_030));
}

#[test]
fn test_resets_disabled_keeps_start_time_metric() {
    let config = ConfigBuilder::new().allow_cumulative_resets(false).build().unwrap();
    let adjuster = Adjuster::from_config(&config).unwrap();

    for (secs, value) in [(10_000, 50.0), (10_060, 3.0)] {
        let ts = t(secs);
        let scrape = TestScrape::at(ts).process_start(9_000).counter("requests_total", value).build();
        let out = adjuster.adjust_at(&scrape, wall(ts));
        assert_eq!(start_of(&out, "requests_total"), t(9_000));
        assert_eq!(out.report.resets, 0);
    }
}

#[test]
fn test_missing_start_metric_without_fallback_passes_through() {
    let config = ConfigBuilder::new().use_fallback(false).build().unwrap();
    let adjuster = Adjuster::from_config(&config).unwrap();
    let ts = t(10_000);

    let out = adjuster.adjust_at(
        &TestScrape::at(ts).counter("requests_total", 5.0).gauge("temperature", 20.0).build(),
        wall(ts),
    );

    let counter = out.points_named("requests_total").next().unwrap();
    assert_eq!(counter.outcome, AdjustmentOutcome::PassThrough);
    assert_eq!(counter.start_timestamp, ts);
    assert_eq!(out.points_named("temperature").next().unwrap().outcome, AdjustmentOutcome::Gauge);
    assert_eq!(out.report.pass_through, 1);
    assert!(!out.report.diagnostics.is_empty());
    assert!(adjuster.cache().is_empty());
}

#[test]
fn test_isolated_point_initial_point_mode() {
    let adjuster = initial_point();
    let ts = t(4_242);
    let out = adjuster.adjust_at(&TestScrape::at(ts).counter("c_total", 3.0).build(), wall(ts));
    assert_eq!(start_of(&out, "c_total"), ts);
}

#[test]
fn test_isolated_point_with_target_fallback() {
    let config = ConfigBuilder::new()
        .fallback_scope(FallbackScope::Target)
        .build()
        .unwrap();
    let adjuster = Adjuster::from_config(&config).unwrap();
    let ts = Timestamp::now();
    let out = adjuster.adjust_at(&TestScrape::at(ts).counter("c_total", 3.0).build(), wall(ts));
    assert_eq!(start_of(&out, "c_total"), ts);
}

#[test]
fn test_created_timestamp_establishes_start() {
    let config = ConfigBuilder::new()
        .mode(AdjustmentMode::InitialPoint)
        .use_created_timestamp(true)
        .build()
        .unwrap();
    let adjuster = Adjuster::from_config(&config).unwrap();
    let ts = t(5_000);
    let scrape = ScrapeBatch::new(JOB, INSTANCE, ts).with_metric(
        ScrapedMetric::new("jobs_total", MetricKind::Sum { monotonic: true }).with_sample(
            ScrapedSample::new(LabelSet::empty(), SamplePayload::Number(9.0)).created(t(4_000)),
        ),
    );

    let out = adjuster.adjust_at(&scrape, wall(ts));
    assert_eq!(start_of(&out, "jobs_total"), t(4_000));
}

#[test]
fn test_type_mismatch_does_not_abort_batch() {
    let adjuster = initial_point();
    let ts = t(1_000);
    let scrape = TestScrape::at(ts)
        .counter("before_total", 1.0)
        .build()
        .with_metric(
            ScrapedMetric::new("broken_total", MetricKind::Sum { monotonic: true }).with_sample(
                ScrapedSample::new(
                    LabelSet::empty(),
                    SamplePayload::Histogram(Default::default()),
                ),
            ),
        )
        .with_metric(
            ScrapedMetric::new("after_total", MetricKind::Sum { monotonic: true })
                .with_sample(ScrapedSample::new(LabelSet::empty(), SamplePayload::Number(2.0))),
        );

    let out = adjuster.adjust_at(&scrape, wall(ts));
    assert_eq!(out.points.len(), 2);
    assert_eq!(out.report.dropped, 1);
    assert_eq!(adjuster.stats().snapshot().points_dropped, 1);
}

#[test]
fn test_label_order_does_not_split_series() {
    let adjuster = initial_point();
    let t1 = t(100);
    let t2 = t(200);
    adjuster.adjust_at(
        &TestScrape::at(t1)
            .counter_with("http_total", LabelSet::new([("code", "200"), ("method", "get")]), 5.0)
            .build(),
        wall(t1),
    );
    let out = adjuster.adjust_at(
        &TestScrape::at(t2)
            .counter_with("http_total", LabelSet::new([("method", "get"), ("code", "200")]), 6.0)
            .build(),
        wall(t2),
    );
    assert_eq!(start_of(&out, "http_total"), t1);
    assert_eq!(adjuster.cache().len(), 1);
}

#[test]
fn test_gc_window_and_reappearance() {
    let config = ConfigBuilder::new()
        .mode(AdjustmentMode::InitialPoint)
        .sweep_interval(Duration::from_secs(60))
        .retention(Duration::from_secs(300))
        .build()
        .unwrap();
    let adjuster = Adjuster::from_config(&config).unwrap();
    let retention = Duration::from_secs(300);
    let interval = Duration::from_secs(60);

    let last = t(1_000_000);
    adjuster.adjust_at(&TestScrape::at(last).counter("c_total", 50.0).build(), wall(last));

    assert_eq!(adjuster.sweep(wall(last) + retention - interval), 0);
    assert_eq!(adjuster.cache().len(), 1);
    assert_eq!(adjuster.sweep(wall(last) + retention + interval), 1);
    assert!(adjuster.cache().is_empty());

    // Seen as new: no reset against the evicted value
    let back = last.saturating_add(retention + interval * 2);
    let out = adjuster.adjust_at(&TestScrape::at(back).counter("c_total", 3.0).build(), wall(back));
    let point = out.points_named("c_total").next().unwrap();
    assert_eq!(point.outcome, AdjustmentOutcome::Established);
    assert_eq!(point.start_timestamp, back);
    assert_eq!(out.report.resets, 0);
}

#[test]
fn test_targets_are_adjusted_in_parallel() {
    let adjuster = initial_point();

    std::thread::scope(|scope| {
        for worker in 0..8u64 {
            let adjuster = &adjuster;
            scope.spawn(move || {
                let instance = format!("10.0.0.{}:9100", worker);
                let mut expected_start = t(1_000);
                for i in 0..100u64 {
                    let ts = t(1_000 + i * 15);
                    // Counter restarts halfway through
                    let value = if i < 50 { i as f64 } else { (i - 50) as f64 * 0.5 };
                    let scrape = TestScrape::for_target(JOB, &instance, ts)
                        .counter("requests_total", value)
                        .build();
                    let out = adjuster.adjust_at(&scrape, wall(ts));
                    if i == 50 {
                        expected_start = ts;
                    }
                    assert_eq!(start_of(&out, "requests_total"), expected_start);
                }
            });
        }
        let adjuster = &adjuster;
        scope.spawn(move || {
            for _ in 0..50 {
                adjuster.sweep(wall(t(1_000)));
            }
        });
    });

    assert_eq!(adjuster.cache().len(), 8);
    assert_eq!(adjuster.stats().snapshot().resets_detected, 8);
}

#[test]
fn test_overlapping_scrapes_of_one_series_are_serialized() {
    use prom_sidecar::metrics::{SeriesKey, TargetKey};
    use std::sync::atomic::{AtomicU64, Ordering};

    const SCRAPES: u64 = 400;
    let adjuster = initial_point();
    let next = AtomicU64::new(0);

    let outcomes: Vec<(AdjustmentOutcome, Timestamp)> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let (adjuster, next) = (&adjuster, &next);
                scope.spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        if i >= SCRAPES {
                            return seen;
                        }
                        let ts = t(1_000 + i);
                        #[allow(clippy::cast_precision_loss)]
                        let scrape = TestScrape::at(ts).counter("requests_total", i as f64).build();
                        let out = adjuster.adjust_at(&scrape, wall(ts));
                        let point = &out.points[0];
                        seen.push((point.outcome, point.start_timestamp));
                    }
                })
            })
            .collect();

        let adjuster = &adjuster;
        scope.spawn(move || {
            for _ in 0..100 {
                adjuster.sweep(wall(t(1_000)));
            }
        });

        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });

    assert_eq!(outcomes.len() as u64, SCRAPES);
    assert!(outcomes.iter().all(|(o, _)| *o != AdjustmentOutcome::Reset));
    assert_eq!(adjuster.stats().snapshot().resets_detected, 0);

    let key = SeriesKey::new(TargetKey::new(JOB, INSTANCE), "requests_total", LabelSet::empty());
    let cached = adjuster.cache().get(&key).unwrap();
    assert_eq!(cached.previous.timestamp, t(1_000 + SCRAPES - 1));
    assert!(outcomes
        .iter()
        .filter(|(o, _)| *o == AdjustmentOutcome::Tracked)
        .all(|(_, start)| *start == cached.start));
    assert_eq!(adjuster.cache().len(), 1);
}
