//! Unix domain socket listener accepting newline-delimited JSON envelopes.

use crate::buffer::LossyBuffer;
use crate::envelope::Envelope;
use crate::metrics::stats::{INGRESS, ORIGIN_MAPPINGS};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum IngressError {
    #[error("failed to prepare socket path {path}: {source}")]
    Path {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct ServerState {
    buffer: Arc<LossyBuffer<Envelope>>,
    active_connections: AtomicUsize,
    max_connections: usize,
}

impl ServerState {
    pub fn new(buffer: Arc<LossyBuffer<Envelope>>, max_connections: usize) -> Self {
        Self {
            buffer,
            active_connections: AtomicUsize::new(0),
            max_connections,
        }
    }

    #[cfg(test)]
    fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    fn ingest(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let mut envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("discarding malformed envelope: {e}");
                return;
            }
        };

        if envelope.source_id.is_empty() {
            if let Some(origin) = envelope.tags.get("origin") {
                envelope.source_id = origin.clone();
                ORIGIN_MAPPINGS.increment();
            }
        }

        INGRESS.increment();
        self.buffer.set(envelope);
    }
}

/// Binds the socket, replacing a stale socket file, and creates the parent
/// directory if needed.
pub fn bind(socket_path: &Path) -> Result<UnixListener, IngressError> {
    let path_error = |source| IngressError::Path {
        path: socket_path.to_path_buf(),
        source,
    };

    if socket_path.exists() {
        std::fs::remove_file(socket_path).map_err(path_error)?;
    }

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).map_err(path_error)?;
    }

    UnixListener::bind(socket_path).map_err(|source| IngressError::Bind {
        path: socket_path.to_path_buf(),
        source,
    })
}

/// Accepts connections until shutdown is signaled.
pub async fn serve(
    listener: UnixListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("ingress listening on {:?}", addr.as_pathname());
    }

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => {
                info!("stopping ingress listener");
                return;
            }
        };

        match accepted {
            Ok((stream, _addr)) => {
                let current = state.active_connections.fetch_add(1, Ordering::Relaxed);

                if current >= state.max_connections {
                    state.active_connections.fetch_sub(1, Ordering::Relaxed);
                    warn!("max connections reached, rejecting new connection");
                    continue;
                }

                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &state).await {
                        debug!("connection error: {e}");
                    }
                    state.active_connections.fetch_sub(1, Ordering::Relaxed);
                });
            }
            Err(e) => {
                error!("accept error: {e}");
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, state: &ServerState) -> Result<(), std::io::Error> {
    let mut lines = BufReader::new(stream).lines();

    while let Some(line) = lines.next_line().await? {
        state.ingest(&line);
    }

    Ok(())
}
