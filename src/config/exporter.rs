use super::*;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Exporter {
    // envelope-derived metrics (and whole source buckets) which have not been
    // updated within the ttl are removed by the expiration sweep
    #[serde(default = "ttl")]
    ttl: String,

    #[serde(default = "expiration_interval")]
    expiration_interval: String,

    #[serde(default)]
    whitelisted_timer_tags: Option<Vec<String>>,
}

impl Default for Exporter {
    fn default() -> Self {
        Self {
            ttl: ttl(),
            expiration_interval: expiration_interval(),
            whitelisted_timer_tags: None,
        }
    }
}

impl Exporter {
    pub fn check(&self) -> Result<(), String> {
        let ttl = parse_duration("exporter.ttl", &self.ttl)?;
        let interval = parse_duration("exporter.expiration_interval", &self.expiration_interval)?;

        if ttl.is_zero() {
            return Err("exporter.ttl must be greater than 0".into());
        }

        if interval.is_zero() {
            return Err("exporter.expiration_interval must be greater than 0".into());
        }

        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        parse_duration("exporter.ttl", &self.ttl).unwrap_or(Duration::from_secs(600))
    }

    pub fn expiration_interval(&self) -> Duration {
        parse_duration("exporter.expiration_interval", &self.expiration_interval)
            .unwrap_or(Duration::from_secs(60))
    }

    pub fn whitelisted_timer_tags(&self) -> Option<&[String]> {
        self.whitelisted_timer_tags.as_deref()
    }
}
