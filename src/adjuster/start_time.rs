//! Start time resolution for a scrape batch.
//!
//! In start time metric mode the whole batch of one target shares a single
//! candidate: the value of the first metric matching the configured pattern,
//! or the fallback when none is present. In initial point mode every series
//! establishes its own start time from its first point.

use crate::adjuster::cache::is_expired;
use crate::core::{AdjusterSettings, AdjustmentMode, FallbackScope};
use crate::metrics::{MetricKind, SamplePayload, ScrapeBatch, TargetKey, Timestamp};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::time::{Duration, SystemTime};

static PROCESS_START: Lazy<SystemTime> = Lazy::new(SystemTime::now);

/// Wall-clock time this process first asked for its start time. Forced when
/// an adjuster is built, so it tracks receiver startup.
pub fn process_start_time() -> SystemTime {
    *PROCESS_START
}

/// Where a resolved start time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSource {
    Metric,
    Fallback,
}

/// Start time candidate for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStart {
    /// Each series establishes its own start time from its first point
    FirstPoint,
    /// Every cumulative series of the target takes this start time
    Resolved { start: Timestamp, source: StartSource },
    /// Nothing to adjust with; cumulative points pass through
    Unresolved,
}

impl BatchStart {
    /// The resolved start time, if any
    pub fn resolved(&self) -> Option<Timestamp> {
        match self {
            BatchStart::Resolved { start, .. } => Some(*start),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TargetSeen {
    first_seen: SystemTime,
    last_seen: SystemTime,
}

/// Resolves per-batch start times according to the configured mode
pub struct StartTimeResolver {
    mode: AdjustmentMode,
    pattern: Regex,
    use_fallback: bool,
    scope: FallbackScope,
    fallback: RwLock<SystemTime>,
    targets: DashMap<TargetKey, TargetSeen, ahash::RandomState>,
}

impl StartTimeResolver {
    /// Creates a resolver; the process-wide fallback is the process start time
    pub fn new(settings: &AdjusterSettings) -> Self {
        Self {
            mode: settings.mode,
            pattern: settings.start_time_metric.clone(),
            use_fallback: settings.use_fallback,
            scope: settings.fallback_scope,
            fallback: RwLock::new(process_start_time()),
            targets: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Process-wide fallback start time
    pub fn fallback_start_time(&self) -> SystemTime {
        *self.fallback.read()
    }

    /// Overrides the process-wide fallback start time
    pub fn set_fallback_start_time(&self, start: SystemTime) {
        *self.fallback.write() = start;
    }

    /// Resolves the start time candidate of a batch. A diagnostic is
    /// returned whenever the start time metric could not be used.
    pub fn resolve(&self, batch: &ScrapeBatch, now: SystemTime) -> (BatchStart, Option<String>) {
        let target = TargetKey::new(batch.job.as_str(), batch.instance.as_str());
        let target_first_seen = self.touch_target(target, now);

        if self.mode == AdjustmentMode::InitialPoint {
            return (BatchStart::FirstPoint, None);
        }

        let mut diagnostic = None;
        match self.find_start_time_metric(batch) {
            Ok(Some(start)) => {
                return (
                    BatchStart::Resolved {
                        start,
                        source: StartSource::Metric,
                    },
                    None,
                )
            }
            Ok(None) => {}
            Err(reason) => diagnostic = Some(reason),
        }

        if !self.use_fallback {
            let reason = diagnostic.unwrap_or_else(|| {
                format!(
                    "no metric matching '{}' in scrape of {}/{}; cumulative points not adjusted",
                    self.pattern.as_str(),
                    batch.job,
                    batch.instance
                )
            });
            return (BatchStart::Unresolved, Some(reason));
        }

        let fallback = match self.scope {
            FallbackScope::Process => self.fallback_start_time(),
            FallbackScope::Target => target_first_seen,
        };
        (
            BatchStart::Resolved {
                start: Timestamp::from_system_time(fallback),
                source: StartSource::Fallback,
            },
            diagnostic,
        )
    }

    /// First matching metric with a usable value wins. Returns an error
    /// message when matches exist but none of them is usable.
    fn find_start_time_metric(&self, batch: &ScrapeBatch) -> Result<Option<Timestamp>, String> {
        let mut rejected = None;

        for metric in batch
            .metrics
            .iter()
            .filter(|m| self.pattern.is_match(&m.name))
        {
            if !matches!(metric.kind, MetricKind::Gauge | MetricKind::Sum { .. }) {
                rejected = Some(format!(
                    "start time metric '{}' has unsupported type {}",
                    metric.name,
                    metric.kind.as_str()
                ));
                continue;
            }

            let value = metric.samples.iter().find_map(|s| match s.payload {
                Some(SamplePayload::Number(v)) if !s.no_recorded_value => Some(v),
                _ => None,
            });

            match value.and_then(Timestamp::from_unix_seconds) {
                Some(start) => return Ok(Some(start)),
                None => {
                    rejected = Some(format!(
                        "start time metric '{}' has no usable value",
                        metric.name
                    ))
                }
            }
        }

        match rejected {
            Some(reason) => Err(reason),
            None => Ok(None),
        }
    }

    /// Records the scrape and returns when the target was first seen.
    fn touch_target(&self, target: TargetKey, now: SystemTime) -> SystemTime {
        let mut seen = self.targets.entry(target).or_insert(TargetSeen {
            first_seen: now,
            last_seen: now,
        });
        seen.last_seen = now;
        seen.first_seen
    }

    /// Forgets targets idle for longer than `retention`
    pub fn sweep(&self, now: SystemTime, retention: Duration) -> usize {
        let before = self.targets.len();
        self.targets
            .retain(|_, seen| !is_expired(seen.last_seen, now, retention));
        before.saturating_sub(self.targets.len())
    }

    /// Number of targets tracked
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}
