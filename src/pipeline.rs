//! Envelope processing between the ingress buffer and the collector.

use crate::buffer::LossyBuffer;
use crate::collector::EnvelopeCollector;
use crate::envelope::{Envelope, Message};
use crate::metrics::MetricKey;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

const MAX_COUNTERS: usize = 10_000;

/// Converts delta counters into running totals.
///
/// Totals are keyed by source id, instance id, name and tags. A counter
/// carrying a total replaces the running total. The table is cleared once it
/// holds more than 10000 entries.
#[derive(Default)]
pub struct CounterAggregator {
    totals: HashMap<(String, String, MetricKey), u64>,
}

impl CounterAggregator {
    pub fn process(&mut self, envelope: &mut Envelope) {
        let counter = match &mut envelope.message {
            Some(Message::Counter(counter)) => counter,
            _ => return,
        };

        if self.totals.len() > MAX_COUNTERS {
            self.totals.clear();
        }

        let key = (
            envelope.source_id.clone(),
            envelope.instance_id.clone(),
            MetricKey::new(&counter.name, envelope.tags.iter()),
        );

        let total = self.totals.entry(key).or_default();

        if counter.total == 0 {
            *total = total.wrapping_add(counter.delta);
        } else {
            *total = counter.total;
        }

        counter.total = *total;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.totals.len()
    }
}

/// Filters and rewrites envelopes before they reach the collector.
#[derive(Default)]
pub struct Pipeline {
    scraped_sources: HashSet<String>,
    timer_tags: Option<HashSet<String>>,
    counters: CounterAggregator,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes from these sources are skipped, their metrics are served by
    /// scraping them directly.
    pub fn scraped_sources(mut self, sources: impl IntoIterator<Item = String>) -> Self {
        self.scraped_sources = sources.into_iter().collect();
        self
    }

    /// Timer envelopes keep only these tags.
    pub fn timer_tags(mut self, tags: Option<&[String]>) -> Self {
        self.timer_tags = tags.map(|tags| tags.iter().cloned().collect());
        self
    }

    pub fn process(&mut self, mut envelope: Envelope) -> Option<Envelope> {
        if self.scraped_sources.contains(&envelope.source_id) {
            return None;
        }

        if let (Some(allowed), Some(Message::Timer(_))) = (&self.timer_tags, &envelope.message) {
            envelope.tags.retain(|k, _| allowed.contains(k));
        }

        self.counters.process(&mut envelope);

        Some(envelope)
    }
}

/// Drains the buffer into the collector until shutdown is signaled.
pub async fn consume(
    buffer: Arc<LossyBuffer<Envelope>>,
    mut pipeline: Pipeline,
    collector: Arc<EnvelopeCollector>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let envelope = tokio::select! {
            envelope = buffer.next() => envelope,
            _ = shutdown.changed() => {
                info!("stopping envelope consumer");
                return;
            }
        };

        if let Some(envelope) = pipeline.process(envelope) {
            if let Err(e) = collector.write(&envelope) {
                error!("unable to write envelope from {}: {e}", envelope.source_id);
            }
        }
    }
}
