use crate::buffer::LossyBuffer;
use crate::collector::EnvelopeCollector;
use crate::envelope::Envelope;
use crate::metrics::{DebugRegistry, MetricValue};

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

pub struct DebugState {
    pub registry: Arc<DebugRegistry>,
    pub collector: Arc<EnvelopeCollector>,
    pub buffer: Arc<LossyBuffer<Envelope>>,
}

pub fn app(state: Arc<DebugState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/vars", get(vars))
        .with_state(state)
}

async fn root() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("Metrics Agent {version}\n")
}

async fn vars(State(state): State<Arc<DebugState>>) -> String {
    human_stats(&state)
}

fn human_stats(state: &DebugState) -> String {
    let mut data = Vec::new();

    for family in state.registry.families() {
        for metric in family.metrics {
            let value = match metric.value {
                MetricValue::Counter(v) | MetricValue::Gauge(v) => v,
                _ => continue,
            };

            if metric.labels.is_empty() {
                data.push(format!("{}: {value}", family.name));
            } else {
                let labels: Vec<String> = metric
                    .labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                data.push(format!("{}/{}: {value}", family.name, labels.join("/")));
            }
        }
    }

    let stats = state.collector.stats();
    data.push(format!("collector/sources: {}", stats.sources));
    data.push(format!("collector/metrics: {}", stats.metrics));
    data.push(format!("buffer/pending: {}", state.buffer.pending()));
    data.push(format!("buffer/dropped: {}", state.buffer.dropped()));

    data.sort();
    let mut content = data.join("\n");
    content += "\n";
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn vars_lists_counters_and_store_size() {
        let registry = Arc::new(DebugRegistry::new());
        registry.increment("modified_tags", "help", &[("originating_source_id", "svc")]);

        let collector = Arc::new(EnvelopeCollector::new(registry.clone()));
        collector
            .write(&Envelope::counter("svc", "requests", 1))
            .unwrap();

        let state = Arc::new(DebugState {
            registry,
            collector,
            buffer: Arc::new(LossyBuffer::new(4)),
        });

        let response = app(state)
            .oneshot(Request::get("/vars").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();

        assert!(body.contains("modified_tags/originating_source_id=svc: 1\n"));
        assert!(body.contains("collector/sources: 1\n"));
        assert!(body.contains("collector/metrics: 1\n"));
        assert!(body.contains("buffer/dropped: 0\n"));
    }
}
