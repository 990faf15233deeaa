use super::*;
use prometheus_parse::{Scrape, Value};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read exposition: {0}")]
    Read(#[from] std::io::Error),
    #[error("exposition contains no parsable samples")]
    NoSamples,
    #[error("invalid sample on line {0}")]
    InvalidLine(usize),
}

/// Parses a Prometheus text exposition into metric families.
///
/// Histogram and summary `_sum`/`_count` samples are folded back into the
/// family they belong to. Any malformed sample line rejects the whole body,
/// a body with no sample lines at all is an empty result.
pub fn parse(body: &str) -> Result<Vec<MetricFamily>, ParseError> {
    let mut sample_lines = 0;

    for (number, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if !is_sample(line) {
            return Err(ParseError::InvalidLine(number + 1));
        }

        sample_lines += 1;
    }

    let scrape = Scrape::parse(body.lines().map(|line| Ok(line.to_owned())))?;

    if scrape.samples.is_empty() && sample_lines > 0 {
        return Err(ParseError::NoSamples);
    }

    let mut families: HashMap<String, MetricFamily> = HashMap::new();
    let mut loose_buckets: HashMap<(String, Labels), Vec<Bucket>> = HashMap::new();

    for sample in scrape.samples {
        let mut labels: Labels = sample
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let value = match sample.value {
            Value::Counter(v) => MetricValue::Counter(v),
            Value::Gauge(v) => MetricValue::Gauge(v),
            Value::Untyped(v) => {
                // bucket lines without a histogram type line
                if let Some(base) = sample.metric.strip_suffix("_bucket") {
                    if let Some(upper_bound) = labels.get("le").and_then(|le| parse_float(le)) {
                        labels.remove("le");
                        loose_buckets
                            .entry((base.to_string(), labels))
                            .or_default()
                            .push(Bucket {
                                upper_bound,
                                cumulative_count: v,
                            });
                        continue;
                    }
                }

                MetricValue::Untyped(v)
            }
            Value::Histogram(counts) => {
                labels.remove("le");

                let buckets = counts
                    .iter()
                    .map(|c| Bucket {
                        upper_bound: c.less_than,
                        cumulative_count: c.count,
                    })
                    .collect();

                MetricValue::Histogram(histogram(buckets))
            }
            Value::Summary(counts) => {
                labels.remove("quantile");

                MetricValue::Summary(SummaryValue {
                    quantiles: counts
                        .iter()
                        .map(|c| Quantile {
                            quantile: c.quantile,
                            value: c.count,
                        })
                        .collect(),
                    count: 0.0,
                    sum: 0.0,
                })
            }
        };

        insert(&mut families, &scrape.docs, &sample.metric, Metric { labels, value });
    }

    for ((name, labels), buckets) in loose_buckets {
        let value = MetricValue::Histogram(histogram(buckets));
        insert(&mut families, &scrape.docs, &name, Metric { labels, value });
    }

    fold_totals(&mut families);

    Ok(families.into_values().collect())
}

/// Checks a line against `name[{label="value",...}] value [timestamp]`.
fn is_sample(line: &str) -> bool {
    let (name, rest) = split_name(line, |c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if name.is_empty() {
        return false;
    }

    let mut rest = rest.trim_start();
    if let Some(labels) = rest.strip_prefix('{') {
        match label_set(labels) {
            Some(after) => rest = after,
            None => return false,
        }
    }

    let mut fields = rest.split_whitespace();

    let value = fields.next().and_then(parse_float).is_some();
    let timestamp = fields.next().is_none_or(|t| t.parse::<i64>().is_ok());

    value && timestamp && fields.next().is_none()
}

/// Consumes a label set up to and including the closing brace, returning
/// what follows it.
fn label_set(mut s: &str) -> Option<&str> {
    loop {
        s = s.trim_start();

        if let Some(after) = s.strip_prefix('}') {
            return Some(after);
        }

        let (name, rest) = split_name(s, |c| c.is_ascii_alphanumeric() || c == '_');
        if name.is_empty() {
            return None;
        }

        let value = rest.trim_start().strip_prefix('=')?.trim_start().strip_prefix('"')?;

        let mut escaped = false;
        let (end, _) = value.char_indices().find(|&(_, c)| {
            if escaped {
                escaped = false;
                false
            } else if c == '\\' {
                escaped = true;
                false
            } else {
                c == '"'
            }
        })?;

        s = value[end + 1..].trim_start();

        match s.strip_prefix(',') {
            Some(after) => s = after,
            None if s.starts_with('}') => {}
            None => return None,
        }
    }
}

/// Splits off a leading metric or label name, which must not start with a
/// digit.
fn split_name(s: &str, allowed: impl Fn(char) -> bool) -> (&str, &str) {
    if s.starts_with(|c: char| c.is_ascii_digit()) {
        return ("", s);
    }

    let end = s.find(|c: char| !allowed(c)).unwrap_or(s.len());
    s.split_at(end)
}

fn parse_float(s: &str) -> Option<f64> {
    match s {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => s.parse().ok(),
    }
}

fn histogram(mut buckets: Vec<Bucket>) -> HistogramValue {
    buckets.sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));

    // until a `_count` sample says otherwise, the +Inf bucket is the count
    let count = buckets
        .last()
        .filter(|b| b.upper_bound == f64::INFINITY)
        .map(|b| b.cumulative_count)
        .unwrap_or(0.0);

    HistogramValue {
        buckets,
        count,
        sum: 0.0,
    }
}

fn insert(
    families: &mut HashMap<String, MetricFamily>,
    docs: &HashMap<String, String>,
    name: &str,
    metric: Metric,
) {
    match families.get_mut(name) {
        Some(family) if family.kind == metric.value.kind() => family.metrics.push(metric),
        Some(_) => {}
        None => {
            let family = MetricFamily::new(name, docs.get(name).cloned(), metric);
            families.insert(name.to_string(), family);
        }
    }
}

fn fold_totals(families: &mut HashMap<String, MetricFamily>) {
    let bases: Vec<String> = families
        .values()
        .filter(|f| matches!(f.kind, MetricKind::Histogram | MetricKind::Summary))
        .map(|f| f.name.clone())
        .collect();

    for base in bases {
        for suffix in ["_sum", "_count"] {
            let name = format!("{base}{suffix}");

            let Some(totals) = families.remove(&name) else {
                continue;
            };

            let Some(family) = families.get_mut(&base) else {
                continue;
            };

            let MetricFamily {
                help,
                kind,
                metrics,
                ..
            } = totals;

            let mut unmatched = Vec::new();

            for total in metrics {
                let value = match total.value {
                    MetricValue::Counter(v) | MetricValue::Gauge(v) | MetricValue::Untyped(v) => v,
                    _ => {
                        unmatched.push(total);
                        continue;
                    }
                };

                match family.metrics.iter_mut().find(|m| m.labels == total.labels) {
                    Some(metric) => set_total(&mut metric.value, suffix, value),
                    None => unmatched.push(total),
                }
            }

            if !unmatched.is_empty() {
                families.insert(
                    name.clone(),
                    MetricFamily {
                        name,
                        help,
                        kind,
                        metrics: unmatched,
                    },
                );
            }
        }
    }
}

fn set_total(value: &mut MetricValue, suffix: &str, total: f64) {
    let (sum, count) = match value {
        MetricValue::Histogram(h) => (&mut h.sum, &mut h.count),
        MetricValue::Summary(s) => (&mut s.sum, &mut s.count),
        _ => return,
    };

    if suffix == "_sum" {
        *sum = total;
    } else {
        *count = total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"
# HELP http_requests_total Total requests.
# TYPE http_requests_total counter
http_requests_total{method="get",code="200"} 1027
http_requests_total{method="post",code="200"} 3
# TYPE temperature gauge
temperature 21.5
# TYPE request_seconds histogram
request_seconds_bucket{le="0.1"} 2
request_seconds_bucket{le="1"} 5
request_seconds_bucket{le="+Inf"} 6
request_seconds_sum 3.2
request_seconds_count 6
"#;

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("missing family {name}"))
    }

    #[test]
    fn parses_families() {
        let families = parse(BODY).unwrap();

        assert_eq!(families.len(), 3);

        let requests = family(&families, "http_requests_total");
        assert_eq!(requests.kind, MetricKind::Counter);
        assert_eq!(requests.help.as_deref(), Some("Total requests."));
        assert_eq!(requests.metrics.len(), 2);
        assert_eq!(
            requests.find(&[("method", "get")]).map(|m| &m.value),
            Some(&MetricValue::Counter(1027.0))
        );

        let temperature = family(&families, "temperature");
        assert_eq!(temperature.metrics[0].value, MetricValue::Gauge(21.5));
    }

    #[test]
    fn folds_histogram_totals() {
        let families = parse(BODY).unwrap();

        let latency = family(&families, "request_seconds");
        assert_eq!(latency.kind, MetricKind::Histogram);
        assert_eq!(latency.metrics.len(), 1);
        assert!(!latency.metrics[0].labels.contains_key("le"));

        let MetricValue::Histogram(histogram) = &latency.metrics[0].value else {
            panic!("expected a histogram");
        };

        let bounds: Vec<f64> = histogram.buckets.iter().map(|b| b.upper_bound).collect();
        assert_eq!(bounds, vec![0.1, 1.0, f64::INFINITY]);
        assert_eq!(histogram.count, 6.0);
        assert!((histogram.sum - 3.2).abs() < 1e-9);
    }

    #[test]
    fn empty_body() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("# just a comment\n").unwrap().is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(
            parse("<html><body>not found</body></html>"),
            Err(ParseError::InvalidLine(1))
        ));
    }

    #[test]
    fn one_bad_line_rejects_the_body() {
        assert!(matches!(
            parse("up 1\nthis is {not valid exposition\n"),
            Err(ParseError::InvalidLine(2))
        ));
        assert!(matches!(
            parse("up{job=\"a\" 1\n"),
            Err(ParseError::InvalidLine(1))
        ));
        assert!(matches!(
            parse("up 1 2 3\n"),
            Err(ParseError::InvalidLine(1))
        ));
    }

    #[test]
    fn sample_syntax() {
        assert!(is_sample("up 1"));
        assert!(is_sample("up{job=\"a\",} 1 1700000000000"));
        assert!(is_sample("up { job = \"a\" } NaN"));
        assert!(is_sample(r#"msg{text="say \"hi\", {ok}"} -Inf"#));
        assert!(is_sample("ns:metric_name 2.5e3"));

        assert!(!is_sample("1up 1"));
        assert!(!is_sample("up"));
        assert!(!is_sample("up{job=a} 1"));
        assert!(!is_sample("up{job=\"a\" 1"));
        assert!(!is_sample("up 1 later"));
    }
}
