use super::*;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct General {
    #[serde(default = "listen")]
    listen: String,

    #[serde(default)]
    instance_id: Option<String>,

    // agent-wide labels, filled into collected and proxied metrics
    #[serde(default)]
    tags: HashMap<String, String>,
}

impl Default for General {
    fn default() -> Self {
        Self {
            listen: listen(),
            instance_id: None,
            tags: HashMap::new(),
        }
    }
}

impl General {
    pub fn check(&self) -> Result<(), String> {
        resolve("listen", &self.listen)?;
        Ok(())
    }

    pub fn listen(&self) -> SocketAddr {
        // validated by `check()` during load
        resolve("listen", &self.listen).unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 14726)))
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }
}
