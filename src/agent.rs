use crate::buffer::LossyBuffer;
use crate::collector::EnvelopeCollector;
use crate::config::Config;
use crate::envelope::Envelope;
use crate::exposition::debug::DebugState;
use crate::exposition::http::MetricsHandler;
use crate::exposition::{self, SHUTDOWN_TIMEOUT};
use crate::gatherer::{Aggregate, Gatherer, ProxyGatherer, TlsConfig};
use crate::ingress::{self, ServerState};
use crate::metrics::stats::DROPPED;
use crate::metrics::DebugRegistry;
use crate::pipeline::{self, Pipeline};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs the agent until it receives a termination signal.
///
/// Envelopes arrive on the ingress socket, pass through the lossy buffer and
/// the pipeline into the collector. The metrics endpoint serves the
/// collector, every scrape target and the agent's own counters.
pub fn run(config: Config) {
    let config = Arc::new(config);

    // configure logging
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(config.log().level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        warn!("failed to capture log records: {e}");
    }

    // initialize async runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("metrics-agent")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to launch async runtime: {e}");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown) = watch::channel(false);

    if let Err(e) = ctrlc::set_handler(move || {
        if shutdown_tx.send_replace(true) {
            info!("terminating immediately");
            std::process::exit(2);
        }
        info!("shutting down");
    }) {
        error!("failed to set ctrl-c handler: {e}");
        std::process::exit(1);
    }

    let registry = Arc::new(DebugRegistry::new());

    let buffer: Arc<LossyBuffer<Envelope>> =
        Arc::new(LossyBuffer::with_alert(config.ingress().buffer_size(), |dropped| {
            DROPPED.add(dropped);
        }));

    let collector = Arc::new(
        EnvelopeCollector::new(registry.clone())
            .with_default_tags(config.default_labels())
            .with_expiration(
                config.exporter().ttl(),
                config.exporter().expiration_interval(),
            ),
    );

    let (aggregate, targets) = match gatherers(&config, &registry, &collector) {
        Ok(gatherers) => gatherers,
        Err(e) => {
            error!("failed to initialize scrape targets: {e}");
            std::process::exit(1);
        }
    };

    let pipeline = Pipeline::new()
        .scraped_sources(config.scrape().targets().iter().map(|t| t.source_id.clone()))
        .timer_tags(config.exporter().whitelisted_timer_tags());

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    tasks.push(rt.spawn(pipeline::consume(
        buffer.clone(),
        pipeline,
        collector.clone(),
        shutdown.clone(),
    )));

    tasks.push(rt.spawn(collector.clone().expire_periodically(shutdown.clone())));

    if config.ingress().enabled() {
        let listener = {
            let _guard = rt.enter();
            ingress::bind(config.ingress().socket_path())
        };

        match listener {
            Ok(listener) => {
                let state = Arc::new(ServerState::new(
                    buffer.clone(),
                    config.ingress().max_connections(),
                ));
                tasks.push(rt.spawn(ingress::serve(listener, state, shutdown.clone())));
            }
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        }
    }

    let handler = Arc::new(MetricsHandler::new(aggregate, targets));
    let listener = bind(&rt, config.general().listen());
    tasks.push(rt.spawn(exposition::serve(
        listener,
        exposition::http::app(handler),
        shutdown.clone(),
    )));

    if config.debug().enabled() {
        let state = Arc::new(DebugState {
            registry: registry.clone(),
            collector: collector.clone(),
            buffer: buffer.clone(),
        });

        let listener = bind(&rt, config.debug().listen());
        tasks.push(rt.spawn(exposition::serve(
            listener,
            exposition::debug::app(state),
            shutdown.clone(),
        )));
    }

    info!(
        "metrics agent {} running on instance {}",
        env!("CARGO_PKG_VERSION"),
        config.general().instance_id().unwrap_or("unknown")
    );

    rt.block_on(async move {
        let mut shutdown = shutdown;
        let _ = shutdown.wait_for(|stop| *stop).await;

        let joined = futures::future::join_all(tasks);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, joined).await.is_err() {
            warn!("tasks did not stop within {SHUTDOWN_TIMEOUT:?}");
        }
    });

    if config.ingress().enabled() {
        if let Err(e) = std::fs::remove_file(config.ingress().socket_path()) {
            debug!("failed to remove ingress socket: {e}");
        }
    }

    info!("metrics agent stopped");
}

type Gatherers = (Arc<dyn Gatherer>, HashMap<String, Arc<dyn Gatherer>>);

/// The combined gatherer plus one gatherer per scrape target.
fn gatherers(
    config: &Config,
    registry: &Arc<DebugRegistry>,
    collector: &Arc<EnvelopeCollector>,
) -> Result<Gatherers, crate::gatherer::ProxyError> {
    let scrape = config.scrape();

    let tls = TlsConfig {
        identity: scrape
            .cert_path()
            .zip(scrape.key_path())
            .map(|(cert, key)| (cert.to_path_buf(), key.to_path_buf())),
        ca: scrape.ca_path().map(|path| path.to_path_buf()),
    };

    let defaults = config.default_labels();

    let proxy = ProxyGatherer::new(scrape.targets(), &defaults, &tls, registry)?;

    let targets: HashMap<String, Arc<dyn Gatherer>> =
        ProxyGatherer::per_target(scrape.targets(), &defaults, &tls, registry)?
            .into_iter()
            .map(|(id, gatherer)| (id, Arc::new(gatherer) as Arc<dyn Gatherer>))
            .collect();

    let gatherers: Vec<Arc<dyn Gatherer>> = vec![collector.clone(), Arc::new(proxy)];

    // the registry goes last so scrape failures show up in the same response
    let aggregate: Arc<dyn Gatherer> = Arc::new(Aggregate::new(gatherers).then(registry.clone()));

    Ok((aggregate, targets))
}

fn bind(rt: &tokio::runtime::Runtime, addr: std::net::SocketAddr) -> TcpListener {
    match rt.block_on(TcpListener::bind(addr)) {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to listen on {addr}: {e}");
            std::process::exit(1);
        }
    }
}
