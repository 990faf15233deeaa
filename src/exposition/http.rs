use crate::gatherer::Gatherer;
use crate::metrics::encode;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tracing::{debug, error};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Routes a metrics fetch to the combined view or to a single scrape target.
pub struct MetricsHandler {
    aggregate: Arc<dyn Gatherer>,
    targets: HashMap<String, Arc<dyn Gatherer>>,
}

impl MetricsHandler {
    pub fn new(aggregate: Arc<dyn Gatherer>, targets: HashMap<String, Arc<dyn Gatherer>>) -> Self {
        Self { aggregate, targets }
    }

    async fn respond(&self, id: Option<&str>) -> Response {
        let gatherer = match id {
            None => &self.aggregate,
            Some(id) => match self.targets.get(id) {
                Some(gatherer) => gatherer,
                None => {
                    debug!("metrics requested for unknown source id: {id}");
                    return StatusCode::NOT_FOUND.into_response();
                }
            },
        };

        match gatherer.gather().await {
            Ok(families) => {
                ([(header::CONTENT_TYPE, CONTENT_TYPE)], encode(&families)).into_response()
            }
            Err(e) => {
                error!("failed to gather metrics: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }
}

#[derive(Deserialize)]
struct MetricsQuery {
    id: Option<String>,
}

pub fn app(handler: Arc<MetricsHandler>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/metrics", get(metrics))
        .with_state(handler)
        .layer(ServiceBuilder::new().layer(CompressionLayer::new()))
}

async fn metrics(
    State(handler): State<Arc<MetricsHandler>>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let id = query.id.as_deref().filter(|id| !id.is_empty());
    handler.respond(id).await
}

async fn root() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("Metrics Agent {version}\nMetrics are available at: /metrics\n")
}
