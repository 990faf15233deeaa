//! Sources of metric families for the exposition endpoint.

use crate::metrics::{merge_families, MetricFamily};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

mod proxy;

pub use proxy::{ProxyError, ProxyGatherer, ScrapeError, TlsConfig};

#[derive(Error, Debug)]
pub enum GatherError {
    #[error("scrape failed: {0}")]
    Scrape(#[from] ScrapeError),
}

/// Something that can produce a point-in-time set of metric families.
#[async_trait]
pub trait Gatherer: Send + Sync {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError>;
}

/// Combines several gatherers into one.
///
/// A gatherer that fails is logged and skipped, the families of the others
/// are still returned. Gatherers added with [`Aggregate::then`] run only
/// after the concurrent ones have finished, so they see counters updated
/// during the same gather.
pub struct Aggregate {
    gatherers: Vec<Arc<dyn Gatherer>>,
    trailing: Vec<Arc<dyn Gatherer>>,
}

impl Aggregate {
    pub fn new(gatherers: Vec<Arc<dyn Gatherer>>) -> Self {
        Self {
            gatherers,
            trailing: Vec::new(),
        }
    }

    pub fn then(mut self, gatherer: Arc<dyn Gatherer>) -> Self {
        self.trailing.push(gatherer);
        self
    }
}

#[async_trait]
impl Gatherer for Aggregate {
    async fn gather(&self) -> Result<Vec<MetricFamily>, GatherError> {
        let mut results =
            futures::future::join_all(self.gatherers.iter().map(|gatherer| gatherer.gather()))
                .await;

        for gatherer in &self.trailing {
            results.push(gatherer.gather().await);
        }

        let mut families = Vec::new();

        for result in results {
            match result {
                Ok(f) => families.extend(f),
                Err(e) => warn!("skipping gatherer: {e}"),
            }
        }

        Ok(merge_families(families))
    }
}
