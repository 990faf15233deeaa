//! Scrapes local Prometheus endpoints and relabels their metrics.

use super::{GatherError, Gatherer};
use crate::config::ScrapeTarget;
use crate::metrics::{parse, DebugCounter, DebugRegistry, Labels, MetricFamily, ParseError};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Client, Identity};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

const FAILED_SCRAPES_HELP: &str = "Total number of failed scrapes for the target";

/// A single target scrape failed. The target's failure counter has been
/// incremented.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(u16),
    #[error("invalid exposition: {0}")]
    Parse(#[from] ParseError),
}

/// The gatherer could not be constructed.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid tls material: {0}")]
    Tls(reqwest::Error),
    #[error("invalid header for target {source_id}: {name}")]
    Header { source_id: String, name: String },
    #[error("failed to build http client: {0}")]
    Client(reqwest::Error),
}

/// PEM material used for every scrape client.
#[derive(Clone, Default)]
pub struct TlsConfig {
    pub identity: Option<(PathBuf, PathBuf)>,
    pub ca: Option<PathBuf>,
}

impl TlsConfig {
    fn load(&self) -> Result<LoadedTls, ProxyError> {
        let identity = match &self.identity {
            Some((cert, key)) => {
                let mut pem = read(cert)?;
                pem.push(b'\n');
                pem.extend(read(key)?);
                Some(Identity::from_pem(&pem).map_err(ProxyError::Tls)?)
            }
            None => None,
        };

        let ca = match &self.ca {
            Some(path) => Some(Certificate::from_pem(&read(path)?).map_err(ProxyError::Tls)?),
            None => None,
        };

        Ok(LoadedTls { identity, ca })
    }
}

struct LoadedTls {
    identity: Option<Identity>,
    ca: Option<Certificate>,
}

fn read(path: &Path) -> Result<Vec<u8>, ProxyError> {
    std::fs::read(path).map_err(|source| ProxyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

struct Target {
    source_id: String,
    url: String,
    headers: HeaderMap,
    labels: HashMap<String, String>,
    client: Client,
    failures: Arc<DebugCounter>,
}

impl Target {
    fn new(
        config: &ScrapeTarget,
        tls: &LoadedTls,
        registry: &DebugRegistry,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port));

        // over mutual tls the server name is the verification name, resolved
        // to loopback
        let server_name = config
            .server_name
            .as_deref()
            .filter(|_| config.scheme == "https" && tls.identity.is_some());

        let host = match server_name {
            Some(name) => format!("{name}:{}", config.port),
            None => loopback.to_string(),
        };

        let url = format!(
            "{}://{host}/{}",
            config.scheme,
            config.path.trim_start_matches('/')
        );

        let mut builder = Client::builder().timeout(timeout).no_proxy();

        if let Some(name) = server_name {
            builder = builder.resolve(name, loopback);
        }

        if let Some(identity) = &tls.identity {
            builder = builder.identity(identity.clone());
        }

        if let Some(ca) = &tls.ca {
            builder = builder.add_root_certificate(ca.clone());
        }

        let client = builder.build().map_err(ProxyError::Client)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header = || ProxyError::Header {
                source_id: config.source_id.clone(),
                name: name.clone(),
            };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| header())?;
            let value = HeaderValue::from_str(value).map_err(|_| header())?;
            headers.insert(name, value);
        }

        let failures = registry.counter(
            "failed_scrapes",
            FAILED_SCRAPES_HELP,
            &[("scrape_source_id", config.source_id.as_str())],
        );

        Ok(Self {
            source_id: config.source_id.clone(),
            url,
            headers,
            labels: config.labels.clone(),
            client,
            failures,
        })
    }

    async fn scrape(&self) -> Result<Vec<MetricFamily>, ScrapeError> {
        let response = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }

        let body = response.text().await?;

        Ok(parse(&body)?)
    }

    /// Layers default labels, target labels, the target source id and finally
    /// the scraped labels. Later layers win.
    fn relabel(&self, defaults: &Labels, scraped: Labels) -> Labels {
        let mut labels = defaults.clone();

        labels.extend(
            self.labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        if !self.source_id.is_empty() {
            labels.insert("source_id".to_string(), self.source_id.clone());
        }

        labels.extend(scraped);
        labels
    }
}

/// Scrapes a fixed set of loopback targets concurrently.
///
/// Each target has a `failed_scrapes` counter registered at construction.
/// A transport error, non-2xx status or unparseable body increments it and
/// leaves that target out of the result without failing the gather.
pub struct ProxyGatherer {
    targets: Vec<Target>,
    default_labels: Labels,
}

impl ProxyGatherer {
    pub fn new(
        targets: &[ScrapeTarget],
        default_labels: &HashMap<String, String>,
        tls: &TlsConfig,
        registry: &DebugRegistry,
    ) -> Result<Self, ProxyError> {
        Self::with_timeout(targets, default_labels, tls, registry, SCRAPE_TIMEOUT)
    }

    fn with_timeout(
        targets: &[ScrapeTarget],
        default_labels: &HashMap<String, String>,
        tls: &TlsConfig,
        registry: &DebugRegistry,
        timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let tls = tls.load()?;

        let targets = targets
            .iter()
            .map(|target| Target::new(target, &tls, registry, timeout))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            targets,
            default_labels: default_labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// One gatherer per target, keyed by source id.
    pub fn per_target(
        targets: &[ScrapeTarget],
        default_labels: &HashMap<String, String>,
        tls: &TlsConfig,
        registry: &DebugRegistry,
    ) -> Result<HashMap<String, ProxyGatherer>, ProxyError> {
        targets
            .iter()
            .map(|target| {
                let gatherer = Self::new(
                    std::slice::from_ref(target),
                    default_labels,
                    tls,
                    registry,
                )?;
                Ok((target.source_id.clone(), gatherer))
            })
            .collect()
    }

    async fn scrape(&self, target: &Target) -> Vec<MetricFamily> {
        match target.scrape().await {
            Ok(families) => families
                .into_iter()
                .map(|mut family| {
                    for metric in family.metrics.iter_mut() {
                        let scraped = std::mem::take(&mut metric.labels);
                        metric.labels = target.relabel(&self.default_labels, scraped);
                    }
                    family
                })
                .collect(),
            Err(e) => {
                debug!("failed to scrape {} at {}: {e}", target.source_id, target.url);
                target.failures.add(1);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Gatherer for ProxyGatherer {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let scrapes = self.targets.iter().map(|target| self.scrape(target));

        let families = futures::future::join_all(scrapes)
            .await
            .into_iter()
            .flatten();

        Ok(crate::metrics::merge_families(families))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;
    use axum::http::{HeaderMap as RequestHeaders, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    async fn refused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn body(text: &'static str) -> Router {
        Router::new().route("/metrics", get(move || async move { text }))
    }

    fn gatherer(targets: &[ScrapeTarget], registry: &DebugRegistry) -> ProxyGatherer {
        let defaults: HashMap<String, String> = [
            ("deployment".to_string(), "prod".to_string()),
            ("job".to_string(), "default".to_string()),
        ]
        .into();

        ProxyGatherer::new(targets, &defaults, &TlsConfig::default(), registry).unwrap()
    }

    fn failures(registry: &DebugRegistry, source_id: &str) -> Option<u64> {
        registry.value("failed_scrapes", &[("scrape_source_id", source_id)])
    }

    #[tokio::test]
    async fn failure_counters_start_at_zero() {
        let registry = DebugRegistry::new();
        gatherer(&[ScrapeTarget::new("a", 1), ScrapeTarget::new("b", 2)], &registry);

        assert_eq!(failures(&registry, "a"), Some(0));
        assert_eq!(failures(&registry, "b"), Some(0));
    }

    #[tokio::test]
    async fn scraped_labels_win() {
        let port = serve(body(
            "# TYPE requests counter\nrequests{job=\"router\",code=\"200\"} 7\n",
        ))
        .await;

        let mut target = ScrapeTarget::new("gorouter", port);
        target.labels.insert("job".into(), "target".into());
        target.labels.insert("zone".into(), "z1".into());

        let registry = DebugRegistry::new();
        let families = gatherer(&[target], &registry).gather().await.unwrap();

        assert_eq!(families.len(), 1);
        let metric = &families[0].metrics[0];

        assert_eq!(metric.value, MetricValue::Counter(7.0));
        assert_eq!(metric.labels["job"], "router");
        assert_eq!(metric.labels["zone"], "z1");
        assert_eq!(metric.labels["deployment"], "prod");
        assert_eq!(metric.labels["source_id"], "gorouter");
        assert_eq!(metric.labels["code"], "200");
        assert_eq!(failures(&registry, "gorouter"), Some(0));
    }

    #[tokio::test]
    async fn target_labels_override_defaults() {
        let port = serve(body("up 1\n")).await;

        let mut target = ScrapeTarget::new("svc", port);
        target.labels.insert("job".into(), "target".into());
        target.labels.insert("source_id".into(), "ignored".into());

        let registry = DebugRegistry::new();
        let families = gatherer(&[target], &registry).gather().await.unwrap();
        let labels = &families[0].metrics[0].labels;

        assert_eq!(labels["job"], "target");
        assert_eq!(labels["source_id"], "svc");
    }

    #[tokio::test]
    async fn uses_path_and_headers() {
        let router = Router::new().route(
            "/custom/path",
            get(|headers: RequestHeaders| async move {
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some("Bearer token") => (StatusCode::OK, "up 1\n"),
                    _ => (StatusCode::UNAUTHORIZED, ""),
                }
            }),
        );
        let port = serve(router).await;

        let mut target = ScrapeTarget::new("svc", port);
        target.path = "/custom/path".into();
        target
            .headers
            .insert("Authorization".into(), "Bearer token".into());

        let registry = DebugRegistry::new();
        let families = gatherer(&[target], &registry).gather().await.unwrap();

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "up");
        assert_eq!(failures(&registry, "svc"), Some(0));
    }

    #[tokio::test]
    async fn failing_target_is_isolated() {
        let refused = refused_port().await;
        let port = serve(body("# TYPE up gauge\nup 1\n")).await;

        let registry = DebugRegistry::new();
        let gatherer = gatherer(
            &[ScrapeTarget::new("a", refused), ScrapeTarget::new("b", port)],
            &registry,
        );

        let families = gatherer.gather().await.unwrap();

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].metrics.len(), 1);
        assert_eq!(families[0].metrics[0].labels["source_id"], "b");
        assert_eq!(failures(&registry, "a"), Some(1));
        assert_eq!(failures(&registry, "b"), Some(0));
    }

    #[tokio::test]
    async fn error_status_is_a_failure() {
        let router = Router::new().route(
            "/metrics",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "up 1\n") }),
        );
        let port = serve(router).await;

        let registry = DebugRegistry::new();
        let gatherer = gatherer(&[ScrapeTarget::new("svc", port)], &registry);

        assert!(gatherer.gather().await.unwrap().is_empty());
        assert!(gatherer.gather().await.unwrap().is_empty());
        assert_eq!(failures(&registry, "svc"), Some(2));
    }

    #[tokio::test]
    async fn malformed_body_is_a_failure() {
        let bad = serve(body("up 1\nthis is {not valid exposition\n")).await;
        let good = serve(body("up 1\n")).await;

        let registry = DebugRegistry::new();
        let gatherer = gatherer(
            &[ScrapeTarget::new("bad", bad), ScrapeTarget::new("good", good)],
            &registry,
        );

        let families = gatherer.gather().await.unwrap();

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].metrics.len(), 1);
        assert_eq!(families[0].metrics[0].labels["source_id"], "good");
        assert_eq!(failures(&registry, "bad"), Some(1));
        assert_eq!(failures(&registry, "good"), Some(0));
    }

    #[tokio::test]
    async fn plain_http_ignores_server_name() {
        let router = Router::new().route(
            "/metrics",
            get(|headers: RequestHeaders| async move {
                let host = headers
                    .get("host")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                format!("up{{host=\"{host}\"}} 1\n")
            }),
        );
        let port = serve(router).await;

        let mut target = ScrapeTarget::new("svc", port);
        target.server_name = Some("metrics.service.internal".into());

        let registry = DebugRegistry::new();
        let families = gatherer(&[target], &registry).gather().await.unwrap();

        assert_eq!(families.len(), 1);
        assert_eq!(
            families[0].metrics[0].labels["host"],
            format!("127.0.0.1:{port}")
        );
        assert_eq!(failures(&registry, "svc"), Some(0));
    }

    #[tokio::test]
    async fn slow_target_times_out() {
        let slow = serve(Router::new().route(
            "/metrics",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "slow 1\n"
            }),
        ))
        .await;
        let fast = serve(body("fast 1\n")).await;

        let registry = DebugRegistry::new();
        let gatherer = ProxyGatherer::with_timeout(
            &[ScrapeTarget::new("slow", slow), ScrapeTarget::new("fast", fast)],
            &HashMap::new(),
            &TlsConfig::default(),
            &registry,
            Duration::from_millis(200),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let families = gatherer.gather().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(4));

        let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["fast"]);
        assert_eq!(failures(&registry, "slow"), Some(1));
        assert_eq!(failures(&registry, "fast"), Some(0));
    }

    #[tokio::test]
    async fn per_target_gatherers() {
        let a = serve(body("a_metric 1\n")).await;
        let b = serve(body("b_metric 2\n")).await;

        let registry = DebugRegistry::new();
        let gatherers = ProxyGatherer::per_target(
            &[ScrapeTarget::new("a", a), ScrapeTarget::new("b", b)],
            &HashMap::new(),
            &TlsConfig::default(),
            &registry,
        )
        .unwrap();

        let families = gatherers["b"].gather().await.unwrap();
        let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();

        assert_eq!(names, ["b_metric"]);
    }

    #[test]
    fn missing_tls_material() {
        let tls = TlsConfig {
            identity: None,
            ca: Some(PathBuf::from("/nonexistent/ca.pem")),
        };

        let result = ProxyGatherer::new(&[], &HashMap::new(), &tls, &DebugRegistry::new());
        assert!(matches!(result, Err(ProxyError::Read { .. })));
    }
}
