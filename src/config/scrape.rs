use super::*;
use std::collections::HashSet;
use std::path::PathBuf;

fn default_scheme() -> String {
    "http".into()
}

fn default_path() -> String {
    "/metrics".into()
}

/// Client credentials shared by every scrape target plus the targets
/// themselves.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Scrape {
    #[serde(default)]
    cert_path: Option<PathBuf>,

    #[serde(default)]
    key_path: Option<PathBuf>,

    #[serde(default)]
    ca_path: Option<PathBuf>,

    #[serde(default)]
    targets: Vec<ScrapeTarget>,
}

/// A local Prometheus endpoint to proxy, reachable on the loopback address.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrapeTarget {
    pub source_id: String,
    pub port: u16,

    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub server_name: Option<String>,
}

#[cfg(test)]
impl ScrapeTarget {
    pub fn new(source_id: impl Into<String>, port: u16) -> Self {
        Self {
            source_id: source_id.into(),
            port,
            scheme: default_scheme(),
            path: default_path(),
            headers: HashMap::new(),
            labels: HashMap::new(),
            server_name: None,
        }
    }
}

impl Scrape {
    pub fn check(&self) -> Result<(), String> {
        let mut seen = HashSet::new();

        for target in &self.targets {
            if target.source_id.is_empty() {
                return Err("scrape target source_id must not be empty".into());
            }

            if !seen.insert(target.source_id.as_str()) {
                return Err(format!(
                    "duplicate scrape target source_id: {}",
                    target.source_id
                ));
            }

            if target.port == 0 {
                return Err(format!(
                    "scrape target {}: port must be greater than 0",
                    target.source_id
                ));
            }

            if !matches!(target.scheme.as_str(), "http" | "https") {
                return Err(format!(
                    "scrape target {}: scheme must be one of: http, https",
                    target.source_id
                ));
            }
        }

        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err("scrape.cert_path and scrape.key_path must be set together".into());
        }

        Ok(())
    }

    pub fn cert_path(&self) -> Option<&Path> {
        self.cert_path.as_deref()
    }

    pub fn key_path(&self) -> Option<&Path> {
        self.key_path.as_deref()
    }

    pub fn ca_path(&self) -> Option<&Path> {
        self.ca_path.as_deref()
    }

    pub fn targets(&self) -> &[ScrapeTarget] {
        &self.targets
    }
}
