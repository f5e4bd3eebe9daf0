//! Adjustment hot path benchmarks.
//!
//! Every scrape of every target goes through extraction, start time
//! resolution and one cache update per cumulative series.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use prom_sidecar::adjuster::Adjuster;
use prom_sidecar::core::AdjusterSettings;
use prom_sidecar::metrics::{
    HistogramPayload, LabelSet, MetricKind, SamplePayload, ScrapeBatch, ScrapedMetric,
    ScrapedSample, Timestamp,
};
use prom_sidecar::receiver::parse_exposition;
use std::fmt::Write;

fn scrape(series: usize, ts: Timestamp, step: u64) -> ScrapeBatch {
    let mut counter = ScrapedMetric::new("http_requests_total", MetricKind::Sum { monotonic: true });
    let mut histogram = ScrapedMetric::new("http_request_duration_seconds", MetricKind::Histogram);
    for i in 0..series {
        let labels = LabelSet::new([("path", format!("/api/{}", i)), ("code", "200".to_string())]);
        #[allow(clippy::cast_precision_loss)]
        counter.samples.push(ScrapedSample::new(
            labels.clone(),
            SamplePayload::Number((step * 10 + i as u64) as f64),
        ));
        histogram.samples.push(ScrapedSample::new(
            labels,
            SamplePayload::Histogram(HistogramPayload {
                count: None,
                sum: Some(1.5),
                bucket_counts: vec![step, step, 1, 0],
                bounds: vec![0.1, 0.5, 1.0],
            }),
        ));
    }
    ScrapeBatch::new("api", "10.0.0.1:8080", ts)
        .with_metric(ScrapedMetric::new("process_start_time_seconds", MetricKind::Gauge).with_sample(
            ScrapedSample::new(LabelSet::empty(), SamplePayload::Number(1_000.0)),
        ))
        .with_metric(counter)
        .with_metric(histogram)
}

/// Steady-state adjustment of already tracked series
fn bench_adjust_tracked(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjust_tracked");

    for series in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements((series * 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(series), &series, |b, &series| {
            let adjuster = Adjuster::new(AdjusterSettings::start_time_metric());
            adjuster.adjust(&scrape(series, Timestamp::from_secs(2_000), 1));
            let batch = scrape(series, Timestamp::from_secs(2_060), 2);
            b.iter(|| black_box(adjuster.adjust(black_box(&batch))));
        });
    }

    group.finish();
}

/// First sight of every series, including cache inserts
fn bench_adjust_cold(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjust_cold");
    let batch = scrape(100, Timestamp::from_secs(2_000), 1);

    group.bench_function("initial_point_100", |b| {
        b.iter(|| {
            let adjuster = Adjuster::new(AdjusterSettings::initial_point());
            black_box(adjuster.adjust(black_box(&batch)))
        });
    });

    group.finish();
}

fn bench_parse_exposition(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_exposition");

    let mut body = String::from("# TYPE http_requests_total counter\n");
    for i in 0..500 {
        let _ = writeln!(body, "http_requests_total{{path=\"/api/{}\",code=\"200\"}} {}", i, i * 3);
    }
    body.push_str("# TYPE rpc_seconds histogram\n");
    for le in ["0.1", "0.5", "1", "+Inf"] {
        let _ = writeln!(body, "rpc_seconds_bucket{{le=\"{}\"}} 10", le);
    }
    body.push_str("rpc_seconds_sum 4.2\nrpc_seconds_count 10\n");

    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("counters_500", |b| {
        b.iter(|| {
            parse_exposition(black_box(&body), "api", "0", Timestamp::from_secs(1)).unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_adjust_tracked, bench_adjust_cold, bench_parse_exposition);
criterion_main!(benches);
