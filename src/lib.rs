//! prom-sidecar - start time and reset adjustment for scraped Prometheus metrics.
//!
//! Prometheus counters, histograms and summaries are cumulative but the text
//! exposition format carries no start time. Exporters downstream need one,
//! and need to know when a counter restarted. This crate keeps per-series
//! state across scrapes and attaches a consistent start timestamp to every
//! cumulative point.
//!
//! # Features
//!
//! - **Start time metric mode**: the whole scrape of a target takes its start
//!   time from `process_start_time_seconds` (or a configured pattern), with a
//!   fallback when the metric is missing
//! - **Initial point mode**: each series starts at its first observed point
//! - **Reset detection**: a drop in a cumulative value re-establishes the start
//! - **Bounded memory**: idle series are garbage collected
//!
//! # Architecture
//!
//! - `receiver`: Prometheus text exposition parsing
//! - `metrics`: series identity, scraped and adjusted point types, extraction
//! - `adjuster`: start time resolution, reset state machine, series cache, GC
//! - `pipeline`: per-target workers feeding an async sink
//! - `core`: configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use prom_sidecar::adjuster::Adjuster;
//! use prom_sidecar::core::Config;
//! use prom_sidecar::metrics::Timestamp;
//! use prom_sidecar::receiver::parse_exposition;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adjuster = Adjuster::from_config(&Config::default())?;
//!     let body = "# TYPE requests_total counter\nrequests_total 42\n";
//!     let batch = parse_exposition(body, "api", "10.0.0.1:8080", Timestamp::now())?;
//!     for point in adjuster.adjust(&batch).points {
//!         println!("{} starts at {}", point.series, point.start_timestamp);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod adjuster;
pub mod cli;
pub mod core;
pub mod metrics;
pub mod pipeline;
pub mod receiver;

// Re-export core types for convenience
pub use crate::adjuster::Adjuster;
pub use crate::core::{Config, Result, SidecarError};
pub use crate::pipeline::{AdjustedSink, ChannelSink, ScrapePipeline};
