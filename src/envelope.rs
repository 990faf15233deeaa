//! Telemetry envelopes emitted by co-located processes.
//!
//! An envelope carries exactly one message (counter, gauge or timer) plus the
//! metadata describing where it came from. Envelopes with no message, or with
//! more than one, carry `message: None` and are ignored by the collector.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(from = "WireEnvelope")]
pub struct Envelope {
    pub source_id: String,
    pub instance_id: String,
    pub tags: HashMap<String, String>,
    pub message: Option<Message>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Counter(Counter),
    Gauge(Gauge),
    Timer(Timer),
}

/// A monotonically increasing count. Emitters send either a `delta` since
/// their last emission or the cumulative `total`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Counter {
    pub name: String,
    #[serde(default)]
    pub delta: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Gauge {
    pub metrics: HashMap<String, GaugeValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct GaugeValue {
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

/// A single timed operation, timestamps in nanoseconds.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Timer {
    pub name: String,
    pub start: i64,
    pub stop: i64,
}

impl Timer {
    pub fn duration_secs(&self) -> f64 {
        self.stop.wrapping_sub(self.start) as f64 / 1_000_000_000.0
    }
}

#[cfg(test)]
impl Envelope {
    pub fn counter(source_id: &str, name: &str, total: u64) -> Self {
        Self::with_message(
            source_id,
            Message::Counter(Counter {
                name: name.to_string(),
                delta: 0,
                total,
            }),
        )
    }

    pub fn delta_counter(source_id: &str, name: &str, delta: u64) -> Self {
        Self::with_message(
            source_id,
            Message::Counter(Counter {
                name: name.to_string(),
                delta,
                total: 0,
            }),
        )
    }

    pub fn gauge<'a>(
        source_id: &str,
        values: impl IntoIterator<Item = (&'a str, f64, &'a str)>,
    ) -> Self {
        let metrics = values
            .into_iter()
            .map(|(name, value, unit)| {
                (
                    name.to_string(),
                    GaugeValue {
                        value,
                        unit: unit.to_string(),
                    },
                )
            })
            .collect();

        Self::with_message(source_id, Message::Gauge(Gauge { metrics }))
    }

    pub fn timer(source_id: &str, name: &str, start: i64, stop: i64) -> Self {
        Self::with_message(
            source_id,
            Message::Timer(Timer {
                name: name.to_string(),
                start,
                stop,
            }),
        )
    }

    fn with_message(source_id: &str, message: Message) -> Self {
        Self {
            source_id: source_id.to_string(),
            instance_id: String::new(),
            tags: HashMap::new(),
            message: Some(message),
        }
    }

    pub fn instance(mut self, instance_id: &str) -> Self {
        self.instance_id = instance_id.to_string();
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

// Newline-delimited JSON shape accepted by the ingress listener. Each variant
// is a sibling field so that malformed input with several populated variants
// can be detected and discarded.
#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    source_id: String,
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    counter: Option<Counter>,
    #[serde(default)]
    gauge: Option<Gauge>,
    #[serde(default)]
    timer: Option<Timer>,
}

impl From<WireEnvelope> for Envelope {
    fn from(wire: WireEnvelope) -> Self {
        let message = match (wire.counter, wire.gauge, wire.timer) {
            (Some(counter), None, None) => Some(Message::Counter(counter)),
            (None, Some(gauge), None) => Some(Message::Gauge(gauge)),
            (None, None, Some(timer)) => Some(Message::Timer(timer)),
            _ => None,
        };

        Self {
            source_id: wire.source_id,
            instance_id: wire.instance_id,
            tags: wire.tags,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_counter() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"source_id":"svc","instance_id":"1","tags":{"a":"b"},"counter":{"name":"requests","total":22}}"#,
        )
        .unwrap();

        assert_eq!(
            envelope,
            Envelope::counter("svc", "requests", 22)
                .instance("1")
                .tag("a", "b")
        );
    }

    #[test]
    fn decode_gauge_with_unit() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"source_id":"svc","gauge":{"metrics":{"memory":{"value":10.5,"unit":"bytes"}}}}"#,
        )
        .unwrap();

        assert_eq!(envelope, Envelope::gauge("svc", [("memory", 10.5, "bytes")]));
    }

    #[test]
    fn multiple_variants_decode_to_nothing() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"source_id":"svc","counter":{"name":"a","total":1},"timer":{"name":"b","start":0,"stop":1}}"#,
        )
        .unwrap();

        assert!(envelope.message.is_none());

        let envelope: Envelope = serde_json::from_str(r#"{"source_id":"svc"}"#).unwrap();
        assert!(envelope.message.is_none());
    }

    #[test]
    fn timer_duration() {
        let timer = Timer {
            name: "http".into(),
            start: 1_000_000,
            stop: 1_001_000_000,
        };

        assert!((timer.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn timer_duration_with_extreme_timestamps() {
        let timer = Timer {
            name: "http".into(),
            start: i64::MIN,
            stop: 1,
        };

        assert!(timer.duration_secs().is_finite());

        let timer = Timer {
            name: "http".into(),
            start: 1,
            stop: i64::MIN,
        };

        assert!(timer.duration_secs().is_finite());
    }
}
