//! Conversion of envelopes into labeled samples.

use super::CollectorError;
use crate::envelope::{Envelope, Message};
use crate::metrics::{DebugRegistry, Labels, MetricKey};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;

const MODIFIED_TAGS: &str = "modified_tags";
const INVALID_METRIC_LABEL: &str = "invalid_metric_label";

/// What to do with a converted sample when it is stored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum Sample {
    Counter(f64),
    Gauge(f64),
    /// A timer duration in seconds, observed into a histogram.
    Timer(f64),
}

#[derive(Debug)]
pub(super) struct Converted {
    pub key: MetricKey,
    pub name: String,
    pub labels: Labels,
    pub sample: Sample,
}

pub(super) struct Converter<'a> {
    pub default_tags: &'a HashMap<String, String>,
    pub registry: &'a DebugRegistry,
}

impl Converter<'_> {
    pub fn convert(&self, envelope: &Envelope) -> Result<Vec<Converted>, CollectorError> {
        let message = match &envelope.message {
            Some(message) => message,
            None => return Ok(Vec::new()),
        };

        match message {
            Message::Counter(counter) => {
                let name = self.sanitize_name(&counter.name, &envelope.source_id);
                let labels = self.labels(envelope)?;

                Ok(vec![converted(
                    name,
                    &counter.name,
                    labels,
                    Sample::Counter(counter.total as f64),
                )?])
            }
            Message::Gauge(gauge) => {
                let base = self.labels(envelope)?;

                gauge
                    .metrics
                    .iter()
                    .map(|(original, value)| {
                        let name = self.sanitize_name(original, &envelope.source_id);
                        let mut labels = base.clone();

                        if !value.unit.is_empty() {
                            insert_unique(&mut labels, "unit".to_string(), value.unit.clone())?;
                        }

                        converted(name, original, labels, Sample::Gauge(value.value))
                    })
                    .collect()
            }
            Message::Timer(timer) => {
                let name =
                    self.sanitize_name(&format!("{}_seconds", timer.name), &envelope.source_id);
                let labels = self.labels(envelope)?;

                Ok(vec![converted(
                    name,
                    &timer.name,
                    labels,
                    Sample::Timer(timer.duration_secs()),
                )?])
            }
        }
    }

    /// Derives the label set shared by every metric in the envelope.
    fn labels(&self, envelope: &Envelope) -> Result<Labels, CollectorError> {
        let source_id = envelope.source_id.as_str();

        let mut tags: HashMap<&str, &str> = envelope
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        for (k, v) in self.default_tags {
            tags.entry(k.as_str()).or_insert(v.as_str());
        }

        let mut labels = Labels::new();

        for (name, value) in tags {
            if name.starts_with("__") || value.is_empty() {
                self.count(INVALID_METRIC_LABEL, source_id);
                continue;
            }

            let sanitized = sanitize(name, |c| c.is_ascii_alphanumeric() || c == '_');
            if sanitized != name {
                self.count(MODIFIED_TAGS, source_id);
            }

            insert_unique(&mut labels, sanitized, value.to_string())?;
        }

        if !envelope.tags.contains_key("source_id") {
            insert_unique(&mut labels, "source_id".to_string(), envelope.source_id.clone())?;
        }

        if !envelope.tags.contains_key("instance_id") && !envelope.instance_id.is_empty() {
            insert_unique(
                &mut labels,
                "instance_id".to_string(),
                envelope.instance_id.clone(),
            )?;
        }

        Ok(labels)
    }

    fn sanitize_name(&self, name: &str, source_id: &str) -> String {
        let sanitized = sanitize(name, |c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
        if sanitized != name {
            self.count(MODIFIED_TAGS, source_id);
        }
        sanitized
    }

    fn count(&self, name: &str, source_id: &str) {
        let help =
            format!("Total number of {name} for the originating source id from the envelope");
        self.registry
            .increment(name, &help, &[("originating_source_id", source_id)]);
    }
}

/// Adds `loggregator_name`, validates the result and derives the identity.
///
/// The identity covers every label except a gauge's `unit`.
fn converted(
    name: String,
    original: &str,
    mut labels: Labels,
    sample: Sample,
) -> Result<Converted, CollectorError> {
    if !valid_name(&name) {
        return Err(CollectorError::InvalidName(name));
    }

    insert_unique(&mut labels, "loggregator_name".to_string(), STANDARD.encode(original))?;

    if let Some(label) = labels.keys().find(|label| !valid_name(label)) {
        return Err(CollectorError::InvalidLabel {
            name,
            label: label.clone(),
        });
    }

    let key = match sample {
        Sample::Gauge(_) => MetricKey::new(&name, labels.iter().filter(|(k, _)| *k != "unit")),
        _ => MetricKey::new(&name, labels.iter()),
    };

    Ok(Converted {
        key,
        name,
        labels,
        sample,
    })
}

fn insert_unique(labels: &mut Labels, name: String, value: String) -> Result<(), CollectorError> {
    if labels.contains_key(&name) {
        return Err(CollectorError::DuplicateLabel(name));
    }
    labels.insert(name, value);
    Ok(())
}

fn sanitize(value: &str, valid: impl Fn(char) -> bool) -> String {
    value
        .chars()
        .map(|c| if valid(c) { c } else { '_' })
        .collect()
}

// names may not be empty or start with a digit
fn valid_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| !c.is_ascii_digit())
}
