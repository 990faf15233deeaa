//! Aggregates envelopes into uniquely identified metrics with expiration.

use crate::envelope::Envelope;
use crate::gatherer::{GatherError, Gatherer};
use crate::metrics::stats::{ENVELOPES_WRITTEN, EXPIRED_METRICS, EXPIRED_SOURCES};
use crate::metrics::{merge_families, DebugRegistry, Metric, MetricFamily};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

mod bucket;
mod convert;

use bucket::SourceIdBucket;
use convert::Converter;

const HELP: &str = "Metrics Agent collected metric";

#[derive(Error, Debug, PartialEq)]
pub enum CollectorError {
    #[error("invalid metric name: {0:?}")]
    InvalidName(String),
    #[error("metric {name}: invalid label name {label:?}")]
    InvalidLabel { name: String, label: String },
    #[error("duplicate label name: {0}")]
    DuplicateLabel(String),
}

/// Number of live source buckets and metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub sources: usize,
    pub metrics: usize,
}

/// Converts envelopes to metrics, grouped into one bucket per source id.
///
/// Writes and expiration sweeps hold the write lock on the bucket map,
/// collection holds the read lock. A bucket that has not been written to
/// within the ttl is removed by the sweep, as is any individual metric that
/// has not been written to within the ttl.
pub struct EnvelopeCollector {
    buckets: RwLock<HashMap<String, SourceIdBucket>>,
    default_tags: HashMap<String, String>,
    ttl: Duration,
    expiration_interval: Duration,
    registry: Arc<DebugRegistry>,
}

impl EnvelopeCollector {
    pub fn new(registry: Arc<DebugRegistry>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            default_tags: HashMap::new(),
            ttl: Duration::from_secs(600),
            expiration_interval: Duration::from_secs(60),
            registry,
        }
    }

    /// Tags added to every metric unless the envelope carries the key.
    pub fn with_default_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.default_tags = tags;
        self
    }

    pub fn with_expiration(mut self, ttl: Duration, interval: Duration) -> Self {
        self.ttl = ttl;
        self.expiration_interval = interval;
        self
    }

    pub fn write(&self, envelope: &Envelope) -> Result<(), CollectorError> {
        self.write_at(envelope, Instant::now())
    }

    fn write_at(&self, envelope: &Envelope, now: Instant) -> Result<(), CollectorError> {
        let converted = Converter {
            default_tags: &self.default_tags,
            registry: &self.registry,
        }
        .convert(envelope)?;

        ENVELOPES_WRITTEN.increment();

        if converted.is_empty() {
            return Ok(());
        }

        let mut buckets = self.buckets.write();
        let bucket = buckets
            .entry(envelope.source_id.clone())
            .or_insert_with(|| SourceIdBucket::new(now));

        for metric in converted {
            bucket.add(metric, now);
        }

        Ok(())
    }

    /// A snapshot of every live metric, grouped into families.
    pub fn collect(&self) -> Vec<MetricFamily> {
        let buckets = self.buckets.read();

        let families: Vec<MetricFamily> = buckets
            .values()
            .flat_map(|bucket| bucket.metrics.values())
            .map(|metric| {
                MetricFamily::new(
                    metric.name.clone(),
                    Some(HELP.to_string()),
                    Metric {
                        labels: metric.labels.clone(),
                        value: metric.value(),
                    },
                )
            })
            .collect();

        drop(buckets);

        merge_families(families)
    }

    /// Removes expired buckets, then expired metrics from the remaining
    /// buckets. Returns the number of metrics removed.
    pub fn expire(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut buckets = self.buckets.write();
        let mut removed = 0;
        let mut sources = 0;

        buckets.retain(|source_id, bucket| {
            if bucket.is_expired(now, ttl) {
                debug!("expiring source id: {source_id}");
                removed += bucket.metrics.len();
                sources += 1;
                return false;
            }

            removed += bucket.expire(now, ttl);
            true
        });

        EXPIRED_METRICS.add(removed as u64);
        EXPIRED_SOURCES.add(sources as u64);

        removed
    }

    pub fn stats(&self) -> CollectorStats {
        let buckets = self.buckets.read();

        CollectorStats {
            sources: buckets.len(),
            metrics: buckets.values().map(|b| b.metrics.len()).sum(),
        }
    }

    /// Sweeps expired metrics every expiration interval until shutdown is
    /// signaled.
    pub async fn expire_periodically(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.expiration_interval);

        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.expire(Instant::now());
                    if removed > 0 {
                        debug!("expired {removed} metrics");
                    }
                }
                _ = shutdown.changed() => {
                    info!("stopping metric expiration");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Gatherer for EnvelopeCollector {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        Ok(self.collect())
    }
}
