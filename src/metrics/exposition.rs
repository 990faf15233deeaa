use super::*;
use std::fmt::Write;

/// Renders metric families in the Prometheus text exposition format.
pub fn encode(families: &[MetricFamily]) -> String {
    let mut out = String::new();

    for family in families {
        family.format(&mut out);
    }

    out
}

trait PrometheusFormat {
    fn format(&self, out: &mut String);
}

impl PrometheusFormat for MetricFamily {
    fn format(&self, out: &mut String) {
        let name = &self.name;

        if let Some(help) = &self.help {
            let _ = writeln!(out, "# HELP {name} {}", escape_help(help));
        }

        let _ = writeln!(out, "# TYPE {name} {}", self.kind.as_str());

        for metric in &self.metrics {
            match &metric.value {
                MetricValue::Counter(value)
                | MetricValue::Gauge(value)
                | MetricValue::Untyped(value) => {
                    sample(out, name, "", &metric.labels, None, *value);
                }
                MetricValue::Histogram(histogram) => {
                    for bucket in &histogram.buckets {
                        let le = format_float(bucket.upper_bound);
                        sample(
                            out,
                            name,
                            "_bucket",
                            &metric.labels,
                            Some(("le", &le)),
                            bucket.cumulative_count,
                        );
                    }

                    // the +Inf bucket is implied by the count when the
                    // source did not provide one
                    let has_inf = matches!(
                        histogram.buckets.last(),
                        Some(b) if b.upper_bound == f64::INFINITY
                    );

                    if !has_inf {
                        sample(
                            out,
                            name,
                            "_bucket",
                            &metric.labels,
                            Some(("le", "+Inf")),
                            histogram.count,
                        );
                    }

                    sample(out, name, "_sum", &metric.labels, None, histogram.sum);
                    sample(out, name, "_count", &metric.labels, None, histogram.count);
                }
                MetricValue::Summary(summary) => {
                    for quantile in &summary.quantiles {
                        let q = format_float(quantile.quantile);
                        sample(
                            out,
                            name,
                            "",
                            &metric.labels,
                            Some(("quantile", &q)),
                            quantile.value,
                        );
                    }

                    sample(out, name, "_sum", &metric.labels, None, summary.sum);
                    sample(out, name, "_count", &metric.labels, None, summary.count);
                }
            }
        }
    }
}

fn sample(
    out: &mut String,
    name: &str,
    suffix: &str,
    labels: &Labels,
    extra: Option<(&str, &str)>,
    value: f64,
) {
    let labels = format_labels(labels, extra);
    let value = format_float(value);

    if labels.is_empty() {
        let _ = writeln!(out, "{name}{suffix} {value}");
    } else {
        let _ = writeln!(out, "{name}{suffix}{{{labels}}} {value}");
    }
}

fn format_labels(labels: &Labels, extra: Option<(&str, &str)>) -> String {
    labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(extra)
        .map(|(key, value)| format!("{key}=\"{}\"", escape_label_value(value)))
        .collect::<Vec<String>>()
        .join(",")
}

fn format_float(value: f64) -> String {
    if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else if value.is_nan() {
        "NaN".to_string()
    } else {
        format!("{value}")
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
