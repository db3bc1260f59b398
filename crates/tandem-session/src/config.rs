use std::time::Duration;

use url::Url;

use tandem_transfer::TransferConfig;

use crate::error::ConfigError;
use crate::status::STATUS_POLL_INTERVAL;

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080/signal";

pub const DEFAULT_ICE_SERVERS: [&str; 2] = ["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"];

/// Everything a [`crate::SessionController`] needs to know up front.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Signaling relay, `ws://` or `wss://`
    pub endpoint: Url,
    pub transfer: TransferConfig,
    pub status_poll_interval: Duration,
    pub ice_servers: Vec<String>,
}

impl SessionConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            transfer: TransferConfig::default(),
            status_poll_interval: STATUS_POLL_INTERVAL,
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Read `TANDEM_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; absent keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = lookup("TANDEM_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.into());
        let endpoint = parse_endpoint(&endpoint)?;
        let mut config = Self::new(endpoint);

        if let Some(v) = lookup("TANDEM_CHUNK_SIZE") {
            config.transfer.chunk_size = parse_positive("TANDEM_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("TANDEM_HIGH_WATER_MARK") {
            config.transfer.high_water_mark = parse_positive("TANDEM_HIGH_WATER_MARK", &v)?;
        }
        if let Some(v) = lookup("TANDEM_COMPLETION_DELAY_MS") {
            config.transfer.completion_delay = Duration::from_millis(parse_positive("TANDEM_COMPLETION_DELAY_MS", &v)? as u64);
        }
        if let Some(v) = lookup("TANDEM_STATUS_POLL_MS") {
            config.status_poll_interval = Duration::from_millis(parse_positive("TANDEM_STATUS_POLL_MS", &v)? as u64);
        }
        if let Some(v) = lookup("TANDEM_ICE_SERVERS") {
            config.ice_servers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key: "TANDEM_ENDPOINT",
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Invalid {
            key: "TANDEM_ENDPOINT",
            reason: format!("scheme must be ws or wss, got {}", other),
        }),
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::Invalid { key, reason: "must be greater than zero".into() }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid { key, reason: e.to_string() }),
    }
}
