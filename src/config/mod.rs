use serde::Deserialize;

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

mod debug;
mod exporter;
mod general;
mod ingress;
mod log;
mod scrape;

pub use debug::DebugServer;
pub use exporter::Exporter;
pub use general::General;
pub use ingress::Ingress;
pub use log::Log;
pub use scrape::{Scrape, ScrapeTarget};

fn enabled() -> bool {
    true
}

fn listen() -> String {
    "0.0.0.0:14726".into()
}

fn debug_listen() -> String {
    "127.0.0.1:14727".into()
}

fn ttl() -> String {
    "10m".into()
}

fn expiration_interval() -> String {
    "1m".into()
}

/// Parses a humantime string, naming the offending setting on failure.
fn parse_duration(setting: &str, value: &str) -> Result<Duration, String> {
    value
        .parse::<humantime::Duration>()
        .map(Into::into)
        .map_err(|e| format!("{setting} couldn't be parsed: {e}"))
}

/// Resolves a `host:port` string to its first socket address.
fn resolve(setting: &str, value: &str) -> Result<SocketAddr, String> {
    value
        .to_socket_addrs()
        .map_err(|e| format!("bad {setting} address: {e}"))?
        .next()
        .ok_or_else(|| format!("could not resolve {setting} socket addr"))
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    general: General,
    #[serde(default)]
    log: Log,
    #[serde(default)]
    exporter: Exporter,
    #[serde(default)]
    ingress: Ingress,
    #[serde(default)]
    scrape: Scrape,
    #[serde(default)]
    debug: DebugServer,
}

impl Config {
    pub fn load(path: &dyn AsRef<Path>) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("unable to open config file: {e}"))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let config: Config =
            toml::from_str(content).map_err(|e| format!("failed to parse config file: {e}"))?;

        config.general.check()?;
        config.exporter.check()?;
        config.ingress.check()?;
        config.scrape.check()?;
        config.debug.check()?;

        Ok(config)
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    pub fn ingress(&self) -> &Ingress {
        &self.ingress
    }

    pub fn scrape(&self) -> &Scrape {
        &self.scrape
    }

    pub fn debug(&self) -> &DebugServer {
        &self.debug
    }

    /// Labels applied to everything this agent exposes unless the metric
    /// already carries the key.
    pub fn default_labels(&self) -> HashMap<String, String> {
        self.general.tags().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").expect("empty config is valid");

        assert_eq!(config.general().listen().port(), 14726);
        assert_eq!(config.exporter().ttl(), Duration::from_secs(600));
        assert_eq!(config.exporter().expiration_interval(), Duration::from_secs(60));
        assert!(config.exporter().whitelisted_timer_tags().is_none());
        assert!(config.ingress().enabled());
        assert_eq!(config.ingress().buffer_size(), 10_000);
        assert!(config.scrape().targets().is_empty());
        assert!(!config.debug().enabled());
    }

    #[test]
    fn full_config() {
        let config = Config::parse(
            r#"
            [general]
            listen = "127.0.0.1:9100"
            instance_id = "vm-0"
            tags = { deployment = "cf", az = "z1" }

            [log]
            level = "debug"

            [exporter]
            ttl = "30s"
            expiration_interval = "5s"
            whitelisted_timer_tags = ["method", "status"]

            [ingress]
            socket_path = "/tmp/agent.sock"
            buffer_size = 16

            [scrape]
            ca_path = "/etc/certs/ca.pem"

            [[scrape.targets]]
            source_id = "router"
            port = 8080

            [[scrape.targets]]
            source_id = "uaa"
            port = 8443
            scheme = "https"
            path = "stats"
            server_name = "uaa.internal"
            headers = { Authorization = "Bearer token" }
            labels = { team = "identity" }

            [debug]
            enabled = true
            "#,
        )
        .expect("config is valid");

        assert_eq!(config.general().listen().port(), 9100);
        assert_eq!(config.general().instance_id(), Some("vm-0"));
        assert_eq!(config.default_labels().get("az").map(String::as_str), Some("z1"));
        assert_eq!(config.log().level(), tracing::Level::DEBUG);
        assert_eq!(config.exporter().ttl(), Duration::from_secs(30));
        assert_eq!(
            config.exporter().whitelisted_timer_tags(),
            Some(&["method".to_string(), "status".to_string()][..])
        );
        assert_eq!(config.ingress().buffer_size(), 16);

        let targets = config.scrape().targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].scheme, "http");
        assert_eq!(targets[0].path, "/metrics");
        assert_eq!(targets[1].server_name.as_deref(), Some("uaa.internal"));
        assert_eq!(targets[1].labels.get("team").map(String::as_str), Some("identity"));
        assert!(config.debug().enabled());
    }

    #[test]
    fn bad_duration_is_rejected() {
        let error = Config::parse("[exporter]\nttl = \"forever\"").err().unwrap();
        assert!(error.contains("exporter.ttl"));
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let error = Config::parse(
            r#"
            [[scrape.targets]]
            source_id = "a"
            port = 1

            [[scrape.targets]]
            source_id = "a"
            port = 2
            "#,
        )
        .err()
        .unwrap();

        assert!(error.contains("duplicate"));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let error = Config::parse(
            r#"
            [[scrape.targets]]
            source_id = "a"
            port = 1
            scheme = "ftp"
            "#,
        )
        .err()
        .unwrap();

        assert!(error.contains("scheme"));
    }
}
