//! Per-series state machine: UNSEEN, ESTABLISHED, RESET_PENDING, TRACKED.
//!
//! [`step`] takes the cached state of one series (if any), the new raw point
//! and the batch's start time candidate, and returns the start time to emit
//! together with the state change to commit. It never touches the cache
//! itself; the caller runs it under the series' lock.

use crate::adjuster::cache::{SeriesPhase, SeriesState};
use crate::adjuster::start_time::BatchStart;
use crate::metrics::{AdjustmentOutcome, RawPoint, Timestamp};
use std::time::SystemTime;

/// Knobs the state machine needs from the adjuster settings
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepContext {
    pub batch_start: BatchStart,
    pub use_created_timestamp: bool,
    pub allow_cumulative_resets: bool,
    pub now: SystemTime,
}

/// Start time to emit for one point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Step {
    pub start: Timestamp,
    pub outcome: AdjustmentOutcome,
}

impl Step {
    fn new(start: Timestamp, outcome: AdjustmentOutcome) -> Self {
        Self { start, outcome }
    }
}

/// A start time never lies after the point it applies to.
fn clamp(start: Timestamp, point: &RawPoint) -> Timestamp {
    start.min(point.timestamp)
}

/// Start time for a series seen for the first time, or `None` when the
/// batch has nothing to establish it with.
fn establishing_start(point: &RawPoint, ctx: &StepContext) -> Option<Timestamp> {
    if ctx.use_created_timestamp {
        if let Some(created) = point.created.filter(|c| *c <= point.timestamp) {
            return Some(created);
        }
    }
    match ctx.batch_start {
        BatchStart::FirstPoint => Some(point.timestamp),
        BatchStart::Resolved { start, .. } => Some(clamp(start, point)),
        BatchStart::Unresolved => None,
    }
}

/// UNSEEN -> ESTABLISHED, or pass-through when no start time is available.
fn establish(point: &RawPoint, ctx: &StepContext) -> (Step, Option<SeriesState>) {
    match establishing_start(point, ctx) {
        Some(start) => (
            Step::new(start, AdjustmentOutcome::Established),
            Some(SeriesState {
                start,
                previous: point.clone(),
                reference_start: ctx.batch_start.resolved(),
                phase: SeriesPhase::Established,
                last_seen: ctx.now,
            }),
        ),
        None => (pass_through(point), None),
    }
}

fn pass_through(point: &RawPoint) -> Step {
    Step::new(point.start_timestamp, AdjustmentOutcome::PassThrough)
}

/// Advances one cumulative series by one point.
pub(crate) fn step(
    state: Option<&mut SeriesState>,
    point: &RawPoint,
    ctx: &StepContext,
) -> (Step, Option<SeriesState>) {
    let state = match state {
        None => return establish(point, ctx),
        // Same name and labels but a different kind: a different series.
        Some(state) if state.previous.value.kind() != point.value.kind() => {
            return establish(point, ctx)
        }
        Some(state) => state,
    };

    // Nothing to adjust with this cycle; the cached state stays as it was.
    if matches!(ctx.batch_start, BatchStart::Unresolved) {
        return (pass_through(point), None);
    }

    if point.timestamp < state.previous.timestamp {
        return (Step::new(clamp(state.start, point), AdjustmentOutcome::OutOfOrder), None);
    }

    if point.no_recorded_value {
        state.last_seen = ctx.now;
        return (Step::new(clamp(state.start, point), AdjustmentOutcome::Stale), None);
    }

    // RESET_PENDING: decided and resolved right here.
    let reset = point.value.is_resettable() && point.value.is_reset_from(&state.previous.value);

    let (start, outcome) = match ctx.batch_start {
        BatchStart::Unresolved => return (pass_through(point), None),
        BatchStart::FirstPoint if reset => (point.timestamp, AdjustmentOutcome::Reset),
        BatchStart::FirstPoint => (state.start, AdjustmentOutcome::Tracked),
        BatchStart::Resolved { start, .. } if !ctx.allow_cumulative_resets => {
            (clamp(start, point), AdjustmentOutcome::Tracked)
        }
        BatchStart::Resolved { .. } if reset => (point.timestamp, AdjustmentOutcome::Reset),
        BatchStart::Resolved { start, .. } if state.reference_start != Some(start) => {
            (clamp(start, point), AdjustmentOutcome::Restarted)
        }
        BatchStart::Resolved { .. } => (clamp(state.start, point), AdjustmentOutcome::Tracked),
    };

    state.start = start;
    state.previous = point.clone();
    state.reference_start = ctx.batch_start.resolved();
    state.last_seen = ctx.now;
    state.phase = match outcome {
        AdjustmentOutcome::Reset => SeriesPhase::Established,
        _ => SeriesPhase::Tracked,
    };

    (Step::new(start, outcome), None)
}
