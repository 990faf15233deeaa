use super::*;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebugServer {
    #[serde(default)]
    enabled: bool,

    #[serde(default = "debug_listen")]
    listen: String,
}

impl Default for DebugServer {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: debug_listen(),
        }
    }
}

impl DebugServer {
    pub fn check(&self) -> Result<(), String> {
        if self.enabled {
            resolve("debug.listen", &self.listen)?;
        }

        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn listen(&self) -> SocketAddr {
        resolve("debug.listen", &self.listen)
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 14727)))
    }
}
