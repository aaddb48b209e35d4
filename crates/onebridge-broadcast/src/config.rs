//! Broadcast service configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use onebridge_core::ServerConfig;

/// Settings of the subscriber endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Whether the service starts at all.
    pub enabled: bool,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Route path.
    pub path: String,
    /// Attach the source event object to every published record.
    pub include_raw_event: bool,
    /// Deadline for each enrichment lookup, in milliseconds.
    pub lookup_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 6702,
            path: "/".into(),
            include_raw_event: false,
            lookup_timeout_ms: 3_000,
        }
    }
}

impl BroadcastConfig {
    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lookup deadline as a [`Duration`].
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// Listener settings for the transport.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.bind_addr(), self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_partial_override() {
        let config: BroadcastConfig =
            serde_json::from_value(serde_json::json!({"enabled": true, "port": 7000})).unwrap();
        assert!(config.enabled);
        assert_eq!(config.bind_addr(), "127.0.0.1:7000");
        assert_eq!(config.path, "/");
        assert_eq!(config.lookup_timeout(), Duration::from_secs(3));
        assert!(!config.include_raw_event);
    }
}
