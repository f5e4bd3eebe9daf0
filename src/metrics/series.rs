//! Timeseries identity across scrape cycles.
//!
//! A series is (job, instance, metric name, label set). Label sets are kept
//! sorted by name so that two sets with the same pairs compare and hash equal
//! no matter what order the scrape listed them in.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

/// Sorted, de-duplicated label pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "BTreeMap<String, String>", from = "BTreeMap<String, String>")]
pub struct LabelSet(SmallVec<[(String, String); 8]>);

impl LabelSet {
    /// A set with no labels
    pub fn empty() -> Self {
        LabelSet(SmallVec::new())
    }

    /// Builds a set from pairs in any order. A repeated name keeps its last
    /// value.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels: SmallVec<[(String, String); 8]> = SmallVec::new();
        for (k, v) in pairs {
            let (k, v) = (k.into(), v.into());
            match labels.binary_search_by(|(name, _)| name.as_str().cmp(k.as_str())) {
                Ok(idx) => labels[idx].1 = v,
                Err(idx) => labels.insert(idx, (k, v)),
            }
        }
        LabelSet(labels)
    }

    /// Value of a label
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].1.as_str())
    }

    /// Copy of this set without the named label
    pub fn without(&self, name: &str) -> Self {
        LabelSet(self.0.iter().filter(|(k, _)| k != name).cloned().collect())
    }

    /// Iterates pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the set has no labels
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        // BTreeMap iteration is already sorted and unique
        LabelSet(map.into_iter().collect())
    }
}

impl From<LabelSet> for BTreeMap<String, String> {
    fn from(labels: LabelSet) -> Self {
        labels.0.into_iter().collect()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}=\"", k)?;
            for c in v.chars() {
                match c {
                    '\\' => f.write_str("\\\\")?,
                    '"' => f.write_str("\\\"")?,
                    '\n' => f.write_str("\\n")?,
                    c => f.write_char(c)?,
                }
            }
            write!(f, "\"")?;
        }
        write!(f, "}}")
    }
}

/// Scrape target identity: job plus instance address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub job: String,
    pub instance: String,
}

impl TargetKey {
    /// Creates a target key
    pub fn new(job: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job, self.instance)
    }
}

/// Unique identity of a timeseries. Equality is value equality over all four
/// parts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    target: TargetKey,
    metric_name: String,
    labels: LabelSet,
}

impl SeriesKey {
    /// Creates a series key
    pub fn new(target: TargetKey, metric_name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            target,
            metric_name: metric_name.into(),
            labels,
        }
    }

    /// Scrape target of this series
    pub fn target(&self) -> &TargetKey {
        &self.target
    }

    /// Scrape job
    pub fn job(&self) -> &str {
        &self.target.job
    }

    /// Target instance address
    pub fn instance(&self) -> &str {
        &self.target.instance
    }

    /// Metric name
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Label set
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.target, self.metric_name, self.labels)
    }
}
