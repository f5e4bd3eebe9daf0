//! Core metric types flowing through the adjuster.
//!
//! Scraped input ([`ScrapeBatch`] / [`ScrapedMetric`] / [`ScrapedSample`]) is
//! loosely typed: a declared kind plus whatever payload the scrape produced.
//! Extraction turns it into a [`RawPoint`] whose [`PointValue`] is a closed
//! set of variants, so every consumer matches exhaustively.

use crate::metrics::series::{LabelSet, SeriesKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_SECOND: f64 = 1e9;

/// Nanoseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from raw nanoseconds since the epoch
    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    /// Creates a timestamp from whole seconds since the epoch
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs * 1_000_000_000)
    }

    /// Interprets a float as Unix seconds, as Prometheus start time and
    /// `_created` samples are exposed. Negative and non-finite values have no
    /// timestamp.
    pub fn from_unix_seconds(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let nanos = secs * NANOS_PER_SECOND;
        if nanos >= u64::MAX as f64 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(Timestamp(nanos.round() as u64))
    }

    /// Exposition format sample timestamps are milliseconds.
    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        let millis = u64::try_from(millis).ok()?;
        millis.checked_mul(1_000_000).map(Timestamp)
    }

    /// Converts a wall-clock time; times before the epoch collapse to zero.
    pub fn from_system_time(time: SystemTime) -> Self {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Timestamp(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Raw nanoseconds since the epoch
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Converts back into a wall-clock time
    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.0)
    }

    /// Adds a duration, saturating at the maximum representable time
    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }

    /// RFC 3339 rendering for human output
    pub fn to_rfc3339(self) -> String {
        let secs = i64::try_from(self.0 / 1_000_000_000).unwrap_or(i64::MAX);
        #[allow(clippy::cast_possible_truncation)]
        let nanos = (self.0 % 1_000_000_000) as u32;
        chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nanos)
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_else(|| self.0.to_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

/// Declared type of a scraped metric family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Counter or up-down counter
    Sum { monotonic: bool },
    /// Point-in-time measurement
    Gauge,
    /// Explicit-bucket distribution
    Histogram,
    /// Client-side quantiles
    Summary,
}

impl MetricKind {
    /// Short name used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Sum { .. } => "sum",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

/// One quantile of a summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

/// Histogram fields as scraped. Bucket counts are per bucket, not cumulative,
/// with one more count than there are bounds (the implicit +Inf bucket).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramPayload {
    pub count: Option<u64>,
    pub sum: Option<f64>,
    pub bucket_counts: Vec<u64>,
    pub bounds: Vec<f64>,
}

/// Summary fields as scraped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub count: Option<u64>,
    pub sum: Option<f64>,
    pub quantiles: Vec<Quantile>,
}

/// Whatever value structure the scrape produced for a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SamplePayload {
    Number(f64),
    Histogram(HistogramPayload),
    Summary(SummaryPayload),
}

impl SamplePayload {
    /// Short name used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplePayload::Number(_) => "number",
            SamplePayload::Histogram(_) => "histogram",
            SamplePayload::Summary(_) => "summary",
        }
    }
}

/// One data point of a scraped family, before extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedSample {
    pub labels: LabelSet,
    /// Explicit sample timestamp; the scrape time applies when absent
    pub timestamp: Option<Timestamp>,
    /// Creation time exposed alongside the sample, if any
    pub created: Option<Timestamp>,
    pub payload: Option<SamplePayload>,
    /// Staleness marker: the target stopped reporting this series
    pub no_recorded_value: bool,
}

impl ScrapedSample {
    /// Creates a sample with the given labels and payload
    pub fn new(labels: LabelSet, payload: SamplePayload) -> Self {
        Self {
            labels,
            timestamp: None,
            created: None,
            payload: Some(payload),
            no_recorded_value: false,
        }
    }

    /// Sets an explicit timestamp
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the created timestamp
    pub fn created(mut self, created: Timestamp) -> Self {
        self.created = Some(created);
        self
    }
}

/// A metric family from one scrape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedMetric {
    pub name: String,
    pub kind: MetricKind,
    pub samples: Vec<ScrapedSample>,
}

impl ScrapedMetric {
    /// Creates an empty family
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            samples: Vec::new(),
        }
    }

    /// Appends a sample
    pub fn with_sample(mut self, sample: ScrapedSample) -> Self {
        self.samples.push(sample);
        self
    }
}

/// Everything one scrape of one target produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeBatch {
    pub job: String,
    pub instance: String,
    pub scrape_time: Timestamp,
    pub metrics: Vec<ScrapedMetric>,
}

impl ScrapeBatch {
    /// Creates an empty batch for a target
    pub fn new(job: impl Into<String>, instance: impl Into<String>, scrape_time: Timestamp) -> Self {
        Self {
            job: job.into(),
            instance: instance.into(),
            scrape_time,
            metrics: Vec::new(),
        }
    }

    /// Appends a metric family
    pub fn with_metric(mut self, metric: ScrapedMetric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Number of samples across all families
    pub fn sample_count(&self) -> usize {
        self.metrics.iter().map(|m| m.samples.len()).sum()
    }
}

/// Typed value of an extracted point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointValue {
    Sum {
        value: f64,
        monotonic: bool,
    },
    Gauge {
        value: f64,
    },
    Histogram {
        count: u64,
        sum: f64,
        bucket_counts: Vec<u64>,
        bounds: Vec<f64>,
    },
    Summary {
        count: u64,
        sum: f64,
        quantiles: Vec<Quantile>,
    },
}

impl PointValue {
    /// Kind of this value
    pub fn kind(&self) -> MetricKind {
        match self {
            PointValue::Sum { monotonic, .. } => MetricKind::Sum {
                monotonic: *monotonic,
            },
            PointValue::Gauge { .. } => MetricKind::Gauge,
            PointValue::Histogram { .. } => MetricKind::Histogram,
            PointValue::Summary { .. } => MetricKind::Summary,
        }
    }

    /// True for values that carry a start time at all
    pub fn has_start_time(&self) -> bool {
        !matches!(self, PointValue::Gauge { .. })
    }

    /// True when a decrease of this value signals a restart of the source
    pub fn is_resettable(&self) -> bool {
        match self {
            PointValue::Sum { monotonic, .. } => *monotonic,
            PointValue::Gauge { .. } => false,
            PointValue::Histogram { .. } | PointValue::Summary { .. } => true,
        }
    }

    /// Compares the reset signal of two values of the same kind: the scalar
    /// for sums, the total count for histograms and summaries. Equal values
    /// never reset. Bucket layout and quantile changes are ignored.
    pub fn is_reset_from(&self, previous: &PointValue) -> bool {
        match (self, previous) {
            (
                PointValue::Sum {
                    value,
                    monotonic: true,
                },
                PointValue::Sum { value: prev, .. },
            ) => value < prev,
            (PointValue::Histogram { count, .. }, PointValue::Histogram { count: prev, .. }) => {
                count < prev
            }
            (PointValue::Summary { count, .. }, PointValue::Summary { count: prev, .. }) => {
                count < prev
            }
            _ => false,
        }
    }
}

/// A normalized scraped point, ready for adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub timestamp: Timestamp,
    /// Start time as scraped; equal to `timestamp` for Prometheus scrapes
    pub start_timestamp: Timestamp,
    pub created: Option<Timestamp>,
    pub value: PointValue,
    pub no_recorded_value: bool,
}

/// What the adjuster did to a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentOutcome {
    /// First sight of the series; start time established
    Established,
    /// Start time carried over (or re-confirmed) from cached state
    Tracked,
    /// Value decreased; start time re-established at the point itself
    Reset,
    /// Start time metric changed; its new value adopted
    Restarted,
    /// Gauge: start time is the point's own timestamp
    Gauge,
    /// No start time resolvable this cycle; scraped start time kept
    PassThrough,
    /// Older than the cached point; emitted without touching state
    OutOfOrder,
    /// No recorded value; cached start time applied without state change
    Stale,
}

/// A point with its resolved start time, raw value unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedPoint {
    pub series: SeriesKey,
    pub start_timestamp: Timestamp,
    pub timestamp: Timestamp,
    pub value: PointValue,
    pub outcome: AdjustmentOutcome,
}

/// Per-batch counts reported alongside the adjusted points
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub adjusted: usize,
    pub dropped: usize,
    pub resets: usize,
    pub pass_through: usize,
    pub out_of_order: usize,
    /// Start time candidate used for this target in start time metric mode
    pub resolved_start: Option<Timestamp>,
    /// Human-readable reasons for dropped or unadjusted points
    pub diagnostics: Vec<String>,
    /// The batch was abandoned before every point was processed
    #[serde(default)]
    pub cancelled: bool,
}

/// Adjusted output of one scrape of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedBatch {
    pub job: String,
    pub instance: String,
    pub points: Vec<AdjustedPoint>,
    pub report: BatchReport,
}

impl AdjustedBatch {
    /// Points of one metric, in batch order
    pub fn points_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a AdjustedPoint> {
        self.points.iter().filter(move |p| p.series.metric_name() == name)
    }
}

/// Label-less sample helper used by tests and the exposition parser
pub fn unlabeled(payload: SamplePayload) -> ScrapedSample {
    ScrapedSample::new(LabelSet::empty(), payload)
}
