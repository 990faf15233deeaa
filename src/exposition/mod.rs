//! HTTP servers: the metrics endpoint and the optional debug interface.

use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub mod debug;
pub mod http;

/// In-flight requests get this long to complete once shutdown is signaled.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Serves `app` until shutdown is signaled, then waits up to
/// `SHUTDOWN_TIMEOUT` for in-flight requests before returning.
pub async fn serve(listener: TcpListener, app: Router, shutdown: watch::Receiver<bool>) {
    if let Ok(addr) = listener.local_addr() {
        info!("http server listening on {addr}");
    }

    let mut graceful = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = graceful.wait_for(|stop| *stop).await;
    });

    let mut deadline = shutdown;
    let forced = async move {
        let _ = deadline.wait_for(|stop| *stop).await;
        tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
    };

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("http server error: {e}");
            }
        }
        _ = forced => {
            warn!("http server did not drain within {SHUTDOWN_TIMEOUT:?}, closing");
        }
    }
}
