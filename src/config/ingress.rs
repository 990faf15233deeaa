use super::*;
use std::path::PathBuf;

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/metrics-agent/ingress.sock")
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_max_connections() -> usize {
    1000
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ingress {
    #[serde(default = "enabled")]
    enabled: bool,

    #[serde(default = "default_socket_path")]
    socket_path: PathBuf,

    #[serde(default = "default_buffer_size")]
    buffer_size: usize,

    #[serde(default = "default_max_connections")]
    max_connections: usize,
}

impl Default for Ingress {
    fn default() -> Self {
        Self {
            enabled: enabled(),
            socket_path: default_socket_path(),
            buffer_size: default_buffer_size(),
            max_connections: default_max_connections(),
        }
    }
}

impl Ingress {
    pub fn check(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("ingress.buffer_size must be greater than 0".into());
        }

        if self.max_connections == 0 {
            return Err("ingress.max_connections must be greater than 0".into());
        }

        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
