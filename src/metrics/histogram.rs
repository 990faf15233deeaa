use super::{Bucket, HistogramValue};

/// Bucket boundaries, in seconds, for histograms built from timer envelopes.
pub const TIMER_BUCKETS: [f64; 5] = [0.01, 0.2, 1.0, 15.0, 60.0];

/// A cumulative histogram with fixed upper bounds.
///
/// Observations accumulate for the lifetime of the histogram, each bucket
/// counts every observation less than or equal to its bound.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    bounds: &'static [f64],
    counts: Vec<u64>,
    count: u64,
    sum: f64,
}

impl Histogram {
    pub fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            counts: vec![0; bounds.len()],
            count: 0,
            sum: 0.0,
        }
    }

    pub fn observe(&mut self, value: f64) {
        for (bound, count) in self.bounds.iter().zip(self.counts.iter_mut()) {
            if value <= *bound {
                *count += 1;
            }
        }

        self.count += 1;
        self.sum += value;
    }

    #[cfg(test)]
    fn count(&self) -> u64 {
        self.count
    }

    #[cfg(test)]
    fn sum(&self) -> f64 {
        self.sum
    }

    pub fn value(&self) -> HistogramValue {
        HistogramValue {
            buckets: self
                .bounds
                .iter()
                .zip(self.counts.iter())
                .map(|(bound, count)| Bucket {
                    upper_bound: *bound,
                    cumulative_count: *count as f64,
                })
                .collect(),
            count: self.count as f64,
            sum: self.sum,
        }
    }
}
