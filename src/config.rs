use crate::protocol::ProtocolType;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Session settings for a [`Device`](crate::Device)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Use this sub-protocol whenever a namespace offers it
    pub force_protocol: Option<ProtocolType>,

    /// Bound for TCP connects and WebSocket handshakes
    pub connect_timeout: Duration,

    /// Bound for a single request/response exchange
    pub request_timeout: Duration,

    /// Liveness window for notification listening
    pub heartbeat_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            force_protocol: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl DeviceConfig {
    /// Defaults overlaid with `SCALARWEB_*` environment variables
    ///
    /// Recognized variables: `SCALARWEB_FORCE_PROTOCOL`, `SCALARWEB_CONNECT_TIMEOUT_MS`,
    /// `SCALARWEB_REQUEST_TIMEOUT_MS` and `SCALARWEB_HEARTBEAT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup("SCALARWEB_FORCE_PROTOCOL") {
            match ProtocolType::parse(&value) {
                Some(protocol) => config.force_protocol = Some(protocol),
                None => tracing::warn!("Ignoring unknown SCALARWEB_FORCE_PROTOCOL: {}", value),
            }
        }

        let millis = |key: &str| -> Option<Duration> {
            let value = lookup(key)?;
            match value.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
                _ => {
                    tracing::warn!("Ignoring invalid {}: {}", key, value);
                    None
                }
            }
        };

        if let Some(d) = millis("SCALARWEB_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = d;
        }
        if let Some(d) = millis("SCALARWEB_REQUEST_TIMEOUT_MS") {
            config.request_timeout = d;
        }
        if let Some(d) = millis("SCALARWEB_HEARTBEAT_MS") {
            config.heartbeat_interval = d;
        }

        config
    }

    pub fn with_force_protocol(mut self, protocol: ProtocolType) -> Self {
        self.force_protocol = Some(protocol);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}
