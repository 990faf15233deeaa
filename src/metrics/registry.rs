use super::*;
use crate::gatherer::{GatherError, Gatherer};

use async_trait::async_trait;
use metriken::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A counter created on first use, identified by name and label set.
pub struct DebugCounter {
    name: String,
    help: String,
    labels: Labels,
    value: AtomicU64,
}

impl DebugCounter {
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Self-instrumentation counters whose labels are only known at runtime, such
/// as the originating source id of a malformed envelope.
///
/// All counters live in one map behind a single lock. Increments happen on
/// the shared atomic so the lock is only held for writing when a new label
/// set is seen.
#[derive(Default)]
pub struct DebugRegistry {
    counters: RwLock<HashMap<MetricKey, Arc<DebugCounter>>>,
}

impl DebugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for this name and label set, creating it at zero
    /// if it does not exist yet.
    pub fn counter(&self, name: &str, help: &str, labels: &[(&str, &str)]) -> Arc<DebugCounter> {
        let key = MetricKey::new(name, labels.iter().map(|(k, v)| (*k, *v)));

        if let Some(counter) = self.counters.read().get(&key) {
            return counter.clone();
        }

        self.counters
            .write()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(DebugCounter {
                    name: name.to_string(),
                    help: help.to_string(),
                    labels: labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                    value: AtomicU64::new(0),
                })
            })
            .clone()
    }

    pub fn increment(&self, name: &str, help: &str, labels: &[(&str, &str)]) {
        self.counter(name, help, labels).add(1);
    }

    /// The current value of a counter, `None` if it was never created.
    #[cfg(test)]
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        let key = MetricKey::new(name, labels.iter().map(|(k, v)| (*k, *v)));
        self.counters.read().get(&key).map(|c| c.value())
    }

    /// Dynamic counters followed by the process-wide counters.
    pub fn families(&self) -> Vec<MetricFamily> {
        let mut families: Vec<MetricFamily> = self
            .counters
            .read()
            .values()
            .map(|counter| {
                MetricFamily::new(
                    counter.name.clone(),
                    Some(counter.help.clone()),
                    Metric {
                        labels: counter.labels.clone(),
                        value: MetricValue::Counter(counter.value() as f64),
                    },
                )
            })
            .collect();

        for metric in metriken::metrics().iter() {
            let value = match metric.value() {
                Some(Value::Counter(value)) => MetricValue::Counter(value as f64),
                Some(Value::Gauge(value)) => MetricValue::Gauge(value as f64),
                _ => continue,
            };

            let labels: Labels = metric
                .metadata()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();

            families.push(MetricFamily::new(
                metric.name(),
                metric.description().map(|d| d.to_string()),
                Metric { labels, value },
            ));
        }

        merge_families(families)
    }
}

#[async_trait]
impl Gatherer for DebugRegistry {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        Ok(self.families())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_keyed_by_labels() {
        let registry = DebugRegistry::new();

        registry.increment("modified_tags", "help", &[("originating_source_id", "a")]);
        registry.increment("modified_tags", "help", &[("originating_source_id", "a")]);
        registry.increment("modified_tags", "help", &[("originating_source_id", "b")]);

        assert_eq!(
            registry.value("modified_tags", &[("originating_source_id", "a")]),
            Some(2)
        );
        assert_eq!(
            registry.value("modified_tags", &[("originating_source_id", "b")]),
            Some(1)
        );
        assert_eq!(
            registry.value("modified_tags", &[("originating_source_id", "c")]),
            None
        );
    }

    #[test]
    fn registered_counters_report_zero() {
        let registry = DebugRegistry::new();
        registry.counter("failed_scrapes", "help", &[("scrape_source_id", "router")]);

        let families = registry.families();
        let failed = families
            .iter()
            .find(|f| f.name == "failed_scrapes")
            .expect("failed_scrapes family");

        assert_eq!(failed.help.as_deref(), Some("help"));
        assert_eq!(
            failed.find(&[("scrape_source_id", "router")]).map(|m| &m.value),
            Some(&MetricValue::Counter(0.0))
        );
    }

    #[test]
    fn includes_process_counters() {
        stats::DROPPED.add(1);

        let families = DebugRegistry::new().families();
        let dropped = families
            .iter()
            .find(|f| f.name == "dropped")
            .expect("dropped family");

        let metric = dropped.find(&[("direction", "ingress")]).expect("ingress direction");
        assert!(matches!(metric.value, MetricValue::Counter(v) if v >= 1.0));
    }
}
