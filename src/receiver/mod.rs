//! Scrape ingestion.
//!
//! Parses Prometheus text exposition bodies into [`ScrapeBatch`]es for the
//! adjuster. Scraping itself (HTTP, service discovery) happens upstream.

pub mod exposition;

pub use exposition::parse_exposition;

use crate::core::Result;
use crate::metrics::{ScrapeBatch, Timestamp};
use std::path::Path;
use tracing::debug;

/// Reads an exposition body from disk and parses it as one scrape of
/// `job`/`instance` taken at `scrape_time`
pub async fn load_scrape(
    path: impl AsRef<Path>,
    job: &str,
    instance: &str,
    scrape_time: Timestamp,
) -> Result<ScrapeBatch> {
    let path = path.as_ref();
    let body = tokio::fs::read_to_string(path).await?;
    let batch = parse_exposition(&body, job, instance, scrape_time)?;
    debug!(
        path = %path.display(),
        families = batch.metrics.len(),
        samples = batch.sample_count(),
        "Loaded scrape"
    );
    Ok(batch)
}
