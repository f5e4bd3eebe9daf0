//! Common test utilities and fixtures.

#![allow(dead_code)]

use prom_sidecar::metrics::{
    HistogramPayload, LabelSet, MetricKind, Quantile, SamplePayload, ScrapeBatch, ScrapedMetric,
    ScrapedSample, SummaryPayload, Timestamp,
};
use std::time::{Duration, SystemTime};

pub const JOB: &str = "node";
pub const INSTANCE: &str = "10.0.0.1:9100";

/// Timestamp `secs` seconds after the epoch
pub fn t(secs: u64) -> Timestamp {
    Timestamp::from_secs(secs)
}

/// Wall-clock instant matching a timestamp
pub fn wall(ts: Timestamp) -> SystemTime {
    ts.to_system_time()
}

pub const HOUR: u64 = 3600;

/// Fixture builder for one scrape of the test target.
pub struct TestScrape {
    batch: ScrapeBatch,
}

impl TestScrape {
    pub fn at(ts: Timestamp) -> Self {
        Self::for_target(JOB, INSTANCE, ts)
    }

    pub fn for_target(job: &str, instance: &str, ts: Timestamp) -> Self {
        Self {
            batch: ScrapeBatch::new(job, instance, ts),
        }
    }

    fn metric(mut self, name: &str, kind: MetricKind, sample: ScrapedSample) -> Self {
        self.batch = self
            .batch
            .with_metric(ScrapedMetric::new(name, kind).with_sample(sample));
        self
    }

    pub fn counter(self, name: &str, value: f64) -> Self {
        self.counter_with(name, LabelSet::empty(), value)
    }

    pub fn counter_with(self, name: &str, labels: LabelSet, value: f64) -> Self {
        self.metric(
            name,
            MetricKind::Sum { monotonic: true },
            ScrapedSample::new(labels, SamplePayload::Number(value)),
        )
    }

    pub fn gauge(self, name: &str, value: f64) -> Self {
        self.metric(
            name,
            MetricKind::Gauge,
            ScrapedSample::new(LabelSet::empty(), SamplePayload::Number(value)),
        )
    }

    /// Per-bucket counts over `bounds`, count left for extraction to derive
    pub fn histogram(self, name: &str, bounds: &[f64], bucket_counts: &[u64], sum: f64) -> Self {
        self.metric(
            name,
            MetricKind::Histogram,
            ScrapedSample::new(
                LabelSet::empty(),
                SamplePayload::Histogram(HistogramPayload {
                    count: None,
                    sum: Some(sum),
                    bucket_counts: bucket_counts.to_vec(),
                    bounds: bounds.to_vec(),
                }),
            ),
        )
    }

    pub fn summary(self, name: &str, count: u64, sum: f64, quantiles: &[(f64, f64)]) -> Self {
        self.metric(
            name,
            MetricKind::Summary,
            ScrapedSample::new(
                LabelSet::empty(),
                SamplePayload::Summary(SummaryPayload {
                    count: Some(count),
                    sum: Some(sum),
                    quantiles: quantiles
                        .iter()
                        .map(|(quantile, value)| Quantile {
                            quantile: *quantile,
                            value: *value,
                        })
                        .collect(),
                }),
            ),
        )
    }

    /// Adds a `process_start_time_seconds` gauge
    pub fn process_start(self, secs: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        self.gauge("process_start_time_seconds", secs as f64)
    }

    pub fn build(self) -> ScrapeBatch {
        self.batch
    }
}

/// A SystemTime `hours` hours before now
pub fn hours_ago(hours: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(hours * HOUR)
}
