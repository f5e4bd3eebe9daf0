//! Series cache: retained per-series state plus the GC sweep.
//!
//! Access to a key goes through [`SeriesCache::with_series`], which holds the
//! key's shard lock for the whole read-decide-write cycle. The sweep removes
//! entries under the same shard locks, so an entry can never be evicted while
//! an adjustment for it is in progress.

use crate::metrics::{RawPoint, SeriesKey, Timestamp};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, SystemTime};

/// Lifecycle phase of a cached series. UNSEEN is the absence of an entry;
/// RESET_PENDING only exists inside a single adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesPhase {
    /// Start time set by first sight or by the latest reset
    Established,
    /// At least one point adjusted against an established start time
    Tracked,
}

/// Retained state of one series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesState {
    /// Start time applied to this series' points
    pub start: Timestamp,
    /// Last accepted raw point, for reset comparison
    pub previous: RawPoint,
    /// Start time metric value the state was last derived from
    pub reference_start: Option<Timestamp>,
    pub phase: SeriesPhase,
    /// Wall-clock time of the last update
    pub last_seen: SystemTime,
}

/// Concurrent map from series to retained state
pub struct SeriesCache {
    series: DashMap<SeriesKey, SeriesState, ahash::RandomState>,
    retention: Duration,
}

impl SeriesCache {
    /// Creates an empty cache evicting series idle for longer than `retention`
    pub fn new(retention: Duration) -> Self {
        Self {
            series: DashMap::with_hasher(ahash::RandomState::new()),
            retention,
        }
    }

    /// Idle time after which a series is evicted
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of cached series
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// True when the series has retained state
    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.series.contains_key(key)
    }

    /// Copy of a series' state
    pub fn get(&self, key: &SeriesKey) -> Option<SeriesState> {
        self.series.get(key).map(|entry| entry.value().clone())
    }

    /// Runs `f` with exclusive access to the series' state (`None` when
    /// unseen). A state returned by `f` replaces (or creates) the entry.
    pub(crate) fn with_series<R>(
        &self,
        key: &SeriesKey,
        f: impl FnOnce(Option<&mut SeriesState>) -> (R, Option<SeriesState>),
    ) -> R {
        match self.series.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let (result, replacement) = f(Some(occupied.get_mut()));
                if let Some(state) = replacement {
                    occupied.insert(state);
                }
                result
            }
            Entry::Vacant(vacant) => {
                let (result, created) = f(None);
                if let Some(state) = created {
                    vacant.insert(state);
                }
                result
            }
        }
    }

    /// Evicts every series idle for longer than the retention threshold at
    /// `now`. Returns the number of evicted series.
    pub fn sweep(&self, now: SystemTime) -> usize {
        let before = self.series.len();
        let retention = self.retention;
        self.series
            .retain(|_, state| !is_expired(state.last_seen, now, retention));
        before.saturating_sub(self.series.len())
    }

    /// Drops all state
    pub fn clear(&self) {
        self.series.clear();
    }
}

/// A clock that moved backwards never expires anything.
pub(crate) fn is_expired(last_seen: SystemTime, now: SystemTime, retention: Duration) -> bool {
    now.duration_since(last_seen)
        .map(|idle| idle > retention)
        .unwrap_or(false)
}
