//! The metric model shared by every gatherer: families of labeled samples in
//! the shape of the Prometheus text exposition format.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;

mod exposition;
mod histogram;
mod key;
mod parse;
mod registry;
pub mod stats;

pub use exposition::encode;
pub use histogram::{Histogram, TIMER_BUCKETS};
pub use key::MetricKey;
pub use parse::{parse, ParseError};
pub use registry::{DebugCounter, DebugRegistry};

/// Label sets are kept sorted so exposition output is deterministic.
pub type Labels = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
            Self::Untyped => "untyped",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Histogram(HistogramValue),
    Summary(SummaryValue),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Untyped(_) => MetricKind::Untyped,
            Self::Histogram(_) => MetricKind::Histogram,
            Self::Summary(_) => MetricKind::Summary,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramValue {
    pub buckets: Vec<Bucket>,
    pub count: f64,
    pub sum: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryValue {
    pub quantiles: Vec<Quantile>,
    pub count: f64,
    pub sum: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    pub labels: Labels,
    pub value: MetricValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub kind: MetricKind,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, help: Option<String>, metric: Metric) -> Self {
        Self {
            name: name.into(),
            help,
            kind: metric.value.kind(),
            metrics: vec![metric],
        }
    }

    /// Finds the first metric in the family whose labels contain every pair
    /// in `labels`.
    #[cfg(test)]
    pub fn find(&self, labels: &[(&str, &str)]) -> Option<&Metric> {
        self.metrics.iter().find(|metric| {
            labels
                .iter()
                .all(|(k, v)| metric.labels.get(*k).map(String::as_str) == Some(*v))
        })
    }
}

/// Merges families sharing a name into one, sorted by name.
///
/// A family whose kind disagrees with an earlier family of the same name is
/// discarded, the exposition format allows a single type per name.
pub fn merge_families(families: impl IntoIterator<Item = MetricFamily>) -> Vec<MetricFamily> {
    let mut merged: BTreeMap<String, MetricFamily> = BTreeMap::new();

    for family in families {
        match merged.entry(family.name.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(family);
            }
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();

                if existing.kind != family.kind {
                    debug!(
                        "dropping {} family {}: already exposed as {}",
                        family.kind.as_str(),
                        family.name,
                        existing.kind.as_str()
                    );
                    continue;
                }

                if existing.help.is_none() {
                    existing.help = family.help;
                }

                existing.metrics.extend(family.metrics);
            }
        }
    }

    merged.into_values().collect()
}
