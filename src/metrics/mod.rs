//! Metric data model: series identity, scraped input, extracted points and
//! adjusted output.

pub mod extract;
pub mod series;
pub mod types;

pub use extract::{extract_batch, extract_point, ExtractError, Extracted, ExtractedPoint};
pub use series::{LabelSet, SeriesKey, TargetKey};
pub use types::{
    AdjustedBatch, AdjustedPoint, AdjustmentOutcome, BatchReport, HistogramPayload, MetricKind,
    PointValue, Quantile, RawPoint, SamplePayload, ScrapeBatch, ScrapedMetric, ScrapedSample,
    SummaryPayload, Timestamp,
};
