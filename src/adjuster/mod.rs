//! Metrics adjustment engine.
//!
//! Turns repeatedly scraped cumulative points into points with consistent
//! start timestamps:
//!
//! - `start_time`: per-batch start time candidate (start time metric,
//!   fallback, or first point)
//! - `reset`: per-series state machine and reset detection
//! - `cache`: retained series state and its sweep
//! - `gc`: background task driving the sweep
//! - `stats`: counters
//!
//! Adjustment is synchronous CPU work. Different series adjust fully in
//! parallel; the same series is serialized by the cache's shard lock.

pub mod cache;
pub mod gc;
mod reset;
pub mod start_time;
pub mod stats;

pub use cache::{SeriesCache, SeriesPhase, SeriesState};
pub use gc::{spawn_gc, GcHandle};
pub use start_time::{process_start_time, BatchStart, StartSource, StartTimeResolver};
pub use stats::{AdjusterStats, StatsSnapshot};

use crate::core::{AdjusterSettings, Config, Result};
use crate::metrics::{
    extract_batch, AdjustedBatch, AdjustedPoint, AdjustmentOutcome, BatchReport, ScrapeBatch,
};
use reset::{step, Step, StepContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Stateful adjuster shared by every scrape worker
pub struct Adjuster {
    settings: AdjusterSettings,
    resolver: StartTimeResolver,
    cache: SeriesCache,
    stats: AdjusterStats,
}

impl Adjuster {
    /// Creates an adjuster from compiled settings
    pub fn new(settings: AdjusterSettings) -> Self {
        Self {
            resolver: StartTimeResolver::new(&settings),
            cache: SeriesCache::new(settings.retention),
            stats: AdjusterStats::default(),
            settings,
        }
    }

    /// Validates the configuration and builds an adjuster from it
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.adjuster_settings()?))
    }

    /// Replaces the process-wide fallback start time
    pub fn with_fallback_start_time(self, start: SystemTime) -> Self {
        self.resolver.set_fallback_start_time(start);
        self
    }

    /// Settings in effect
    pub fn settings(&self) -> &AdjusterSettings {
        &self.settings
    }

    /// Retained series state
    pub fn cache(&self) -> &SeriesCache {
        &self.cache
    }

    /// Start time resolver
    pub fn resolver(&self) -> &StartTimeResolver {
        &self.resolver
    }

    /// Counters
    pub fn stats(&self) -> &AdjusterStats {
        &self.stats
    }

    /// Adjusts one scrape batch using the current wall-clock time
    pub fn adjust(&self, batch: &ScrapeBatch) -> AdjustedBatch {
        self.adjust_at(batch, SystemTime::now())
    }

    /// Adjusts one scrape batch; `now` is recorded as the series' last
    /// update time
    pub fn adjust_at(&self, batch: &ScrapeBatch, now: SystemTime) -> AdjustedBatch {
        self.run(batch, now, None)
    }

    /// Like [`Adjuster::adjust_at`], but stops between points once `cancel`
    /// is set. Points already committed stay committed.
    pub fn adjust_cancellable(
        &self,
        batch: &ScrapeBatch,
        now: SystemTime,
        cancel: &AtomicBool,
    ) -> AdjustedBatch {
        self.run(batch, now, Some(cancel))
    }

    fn run(
        &self,
        batch: &ScrapeBatch,
        now: SystemTime,
        cancel: Option<&AtomicBool>,
    ) -> AdjustedBatch {
        let extracted = extract_batch(batch);
        let mut report = BatchReport::default();

        for error in &extracted.errors {
            warn!(job = %batch.job, instance = %batch.instance, "Dropping point: {}", error);
            report.diagnostics.push(error.to_string());
        }
        report.dropped = extracted.errors.len();

        let (batch_start, diagnostic) = self.resolver.resolve(batch, now);
        if let Some(reason) = diagnostic {
            warn!(job = %batch.job, instance = %batch.instance, "{}", reason);
            report.diagnostics.push(reason);
        }
        report.resolved_start = batch_start.resolved();

        let ctx = StepContext {
            batch_start,
            use_created_timestamp: self.settings.use_created_timestamp,
            allow_cumulative_resets: self.settings.allow_cumulative_resets,
            now,
        };

        let mut points = Vec::with_capacity(extracted.points.len());
        for extracted_point in extracted.points {
            if cancel.map_or(false, |c| c.load(Ordering::Relaxed)) {
                debug!(job = %batch.job, instance = %batch.instance, "Adjustment cancelled mid-batch");
                report.cancelled = true;
                break;
            }

            let series = extracted_point.series;
            let point = extracted_point.point;

            let Step { start, outcome } = if point.value.has_start_time() {
                self.cache
                    .with_series(&series, |state| step(state, &point, &ctx))
            } else {
                Step {
                    start: point.timestamp,
                    outcome: AdjustmentOutcome::Gauge,
                }
            };

            match outcome {
                AdjustmentOutcome::Reset => {
                    debug!(series = %series, start = %start, "Counter reset detected");
                    report.resets += 1;
                }
                AdjustmentOutcome::Restarted => {
                    debug!(series = %series, start = %start, "Start time metric changed");
                }
                AdjustmentOutcome::PassThrough => report.pass_through += 1,
                AdjustmentOutcome::OutOfOrder => {
                    debug!(series = %series, "Point older than cached state, not committed");
                    report.out_of_order += 1;
                }
                _ => {}
            }

            points.push(AdjustedPoint {
                series,
                start_timestamp: start,
                timestamp: point.timestamp,
                value: point.value,
                outcome,
            });
        }
        report.adjusted = points.len() - report.pass_through;

        self.record(&report);

        AdjustedBatch {
            job: batch.job.clone(),
            instance: batch.instance.clone(),
            points,
            report,
        }
    }

    fn record(&self, report: &BatchReport) {
        AdjusterStats::add(&self.stats.batches, 1);
        AdjusterStats::add(&self.stats.points_adjusted, report.adjusted);
        AdjusterStats::add(&self.stats.resets_detected, report.resets);
        AdjusterStats::add(&self.stats.points_dropped, report.dropped);
        AdjusterStats::add(&self.stats.points_passed_through, report.pass_through);
        AdjusterStats::add(&self.stats.points_out_of_order, report.out_of_order);
    }

    /// Evicts series (and fallback targets) idle for longer than the
    /// retention threshold at `now`. Returns the number of evicted series.
    pub fn sweep(&self, now: SystemTime) -> usize {
        let evicted = self.cache.sweep(now);
        let targets = self.resolver.sweep(now, self.settings.retention);
        AdjusterStats::add(&self.stats.series_evicted, evicted);
        debug!(evicted, targets, remaining = self.cache.len(), "GC sweep finished");
        evicted
    }
}
