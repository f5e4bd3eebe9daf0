//! Point extraction: scraped samples into typed [`RawPoint`]s.
//!
//! Pure transform. A sample whose payload does not fit its declared kind, or
//! lacks a field its kind requires, yields an [`ExtractError`] for that one
//! sample; the rest of the batch is unaffected. Callers decide how to log.

use crate::metrics::series::{SeriesKey, TargetKey};
use crate::metrics::types::{
    HistogramPayload, MetricKind, PointValue, RawPoint, SamplePayload, ScrapeBatch, ScrapedSample,
    SummaryPayload, Timestamp,
};
use thiserror::Error;

/// Why a sample could not become a point
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("metric '{metric}' is declared {declared} but carries a {found} payload")]
    TypeMismatch {
        metric: String,
        declared: &'static str,
        found: &'static str,
    },

    #[error("metric '{metric}' has a malformed point: {reason}")]
    Malformed { metric: String, reason: String },
}

impl ExtractError {
    fn malformed(metric: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }

    /// Metric the failing sample belonged to
    pub fn metric(&self) -> &str {
        match self {
            Self::TypeMismatch { metric, .. } | Self::Malformed { metric, .. } => metric,
        }
    }
}

/// A point together with the series it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPoint {
    pub series: SeriesKey,
    pub point: RawPoint,
}

/// Result of extracting a whole batch
#[derive(Debug, Default)]
pub struct Extracted {
    pub points: Vec<ExtractedPoint>,
    pub errors: Vec<ExtractError>,
}

/// Extracts every sample of a batch, in batch order.
pub fn extract_batch(batch: &ScrapeBatch) -> Extracted {
    let target = TargetKey::new(batch.job.as_str(), batch.instance.as_str());
    let mut extracted = Extracted {
        points: Vec::with_capacity(batch.sample_count()),
        errors: Vec::new(),
    };

    for metric in &batch.metrics {
        for sample in &metric.samples {
            match extract_point(&metric.name, metric.kind, sample, batch.scrape_time) {
                Ok(point) => extracted.points.push(ExtractedPoint {
                    series: SeriesKey::new(target.clone(), metric.name.as_str(), sample.labels.clone()),
                    point,
                }),
                Err(e) => extracted.errors.push(e),
            }
        }
    }

    extracted
}

/// Extracts one sample. The scrape time stands in for a missing sample
/// timestamp.
pub fn extract_point(
    metric: &str,
    kind: MetricKind,
    sample: &ScrapedSample,
    scrape_time: Timestamp,
) -> Result<RawPoint, ExtractError> {
    let timestamp = sample.timestamp.unwrap_or(scrape_time);

    let value = match (&sample.payload, sample.no_recorded_value) {
        (None, true) => stale_value(kind),
        (None, false) => return Err(ExtractError::malformed(metric, "sample has no value")),
        (Some(payload), _) => typed_value(metric, kind, payload, sample.no_recorded_value)?,
    };

    Ok(RawPoint {
        timestamp,
        start_timestamp: timestamp,
        created: sample.created,
        value,
        no_recorded_value: sample.no_recorded_value,
    })
}

fn typed_value(
    metric: &str,
    kind: MetricKind,
    payload: &SamplePayload,
    no_recorded_value: bool,
) -> Result<PointValue, ExtractError> {
    match (kind, payload) {
        (MetricKind::Sum { monotonic }, SamplePayload::Number(value)) => {
            if value.is_nan() && !no_recorded_value {
                return Err(ExtractError::malformed(metric, "counter value is NaN"));
            }
            Ok(PointValue::Sum {
                value: *value,
                monotonic,
            })
        }
        (MetricKind::Gauge, SamplePayload::Number(value)) => Ok(PointValue::Gauge { value: *value }),
        (MetricKind::Histogram, SamplePayload::Histogram(h)) => histogram_value(metric, h),
        (MetricKind::Summary, SamplePayload::Summary(s)) => summary_value(metric, s),
        (declared, found) => Err(ExtractError::TypeMismatch {
            metric: metric.to_string(),
            declared: declared.as_str(),
            found: found.as_str(),
        }),
    }
}

fn histogram_value(metric: &str, h: &HistogramPayload) -> Result<PointValue, ExtractError> {
    let sum = h
        .sum
        .ok_or_else(|| ExtractError::malformed(metric, "histogram has no sum"))?;

    if !h.bucket_counts.is_empty() && h.bucket_counts.len() != h.bounds.len() + 1 {
        return Err(ExtractError::malformed(
            metric,
            format!(
                "histogram has {} bucket counts for {} bounds",
                h.bucket_counts.len(),
                h.bounds.len()
            ),
        ));
    }

    if h.bounds.windows(2).any(|w| !(w[0] < w[1])) {
        return Err(ExtractError::malformed(metric, "histogram bounds are not strictly increasing"));
    }

    let count = match (h.count, h.bucket_counts.is_empty()) {
        (Some(count), _) => count,
        (None, false) => h
            .bucket_counts
            .iter()
            .try_fold(0u64, |total, c| total.checked_add(*c))
            .ok_or_else(|| ExtractError::malformed(metric, "histogram bucket counts overflow"))?,
        (None, true) => {
            return Err(ExtractError::malformed(metric, "histogram has neither buckets nor count"))
        }
    };

    Ok(PointValue::Histogram {
        count,
        sum,
        bucket_counts: h.bucket_counts.clone(),
        bounds: h.bounds.clone(),
    })
}

fn summary_value(metric: &str, s: &SummaryPayload) -> Result<PointValue, ExtractError> {
    let count = s
        .count
        .ok_or_else(|| ExtractError::malformed(metric, "summary has no count"))?;
    let sum = s
        .sum
        .ok_or_else(|| ExtractError::malformed(metric, "summary has no sum"))?;

    Ok(PointValue::Summary {
        count,
        sum,
        quantiles: s.quantiles.clone(),
    })
}

/// Placeholder value for a staleness marker; never compared against.
fn stale_value(kind: MetricKind) -> PointValue {
    match kind {
        MetricKind::Sum { monotonic } => PointValue::Sum {
            value: f64::NAN,
            monotonic,
        },
        MetricKind::Gauge => PointValue::Gauge { value: f64::NAN },
        MetricKind::Histogram => PointValue::Histogram {
            count: 0,
            sum: f64::NAN,
            bucket_counts: Vec::new(),
            bounds: Vec::new(),
        },
        MetricKind::Summary => PointValue::Summary {
            count: 0,
            sum: f64::NAN,
            quantiles: Vec::new(),
        },
    }
}
