use super::convert::{Converted, Sample};
use crate::metrics::{Histogram, Labels, MetricKey, MetricValue, TIMER_BUCKETS};

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub(super) enum Stored {
    Counter(f64),
    Gauge(f64),
    Histogram(Histogram),
}

impl Stored {
    fn value(&self) -> MetricValue {
        match self {
            Self::Counter(v) => MetricValue::Counter(*v),
            Self::Gauge(v) => MetricValue::Gauge(*v),
            Self::Histogram(h) => MetricValue::Histogram(h.value()),
        }
    }
}

pub(super) struct MetricWithExpiry {
    pub name: String,
    pub labels: Labels,
    pub stored: Stored,
    pub updated: Instant,
}

impl MetricWithExpiry {
    pub fn value(&self) -> MetricValue {
        self.stored.value()
    }
}

/// The live metrics of one source id, the unit of expiration.
pub(super) struct SourceIdBucket {
    pub metrics: HashMap<MetricKey, MetricWithExpiry>,
    pub updated: Instant,
}

impl SourceIdBucket {
    pub fn new(now: Instant) -> Self {
        Self {
            metrics: HashMap::new(),
            updated: now,
        }
    }

    /// Counters and gauges replace the stored value. Timers are observed into
    /// the existing histogram for the identity, or a new one.
    pub fn add(&mut self, converted: Converted, now: Instant) {
        let Converted {
            key,
            name,
            labels,
            sample,
        } = converted;

        let stored = match sample {
            Sample::Counter(v) => Stored::Counter(v),
            Sample::Gauge(v) => Stored::Gauge(v),
            Sample::Timer(seconds) => {
                let mut histogram = match self.metrics.remove(&key) {
                    Some(MetricWithExpiry {
                        stored: Stored::Histogram(histogram),
                        ..
                    }) => histogram,
                    _ => Histogram::new(&TIMER_BUCKETS),
                };
                histogram.observe(seconds);
                Stored::Histogram(histogram)
            }
        };

        self.metrics.insert(
            key,
            MetricWithExpiry {
                name,
                labels,
                stored,
                updated: now,
            },
        );
        self.updated = now;
    }

    /// Removes metrics not updated within `ttl` of `now`, returning how many
    /// were removed.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.metrics.len();
        self.metrics
            .retain(|_, metric| now.saturating_duration_since(metric.updated) < ttl);
        before - self.metrics.len()
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.updated) >= ttl
    }
}
