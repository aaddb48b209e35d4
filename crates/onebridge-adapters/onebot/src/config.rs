//! Gateway adapter configuration.
//!
//! Loaded once at startup as the `gateway` section of the application
//! config and never mutated afterwards.
//!
//! # Example Configuration
//!
//! ```toml
//! [gateway]
//! mode = "outbound"
//! url = "ws://127.0.0.1:3001"
//! access_token = "secret"
//! call_timeout_ms = 30000
//!
//! [gateway.reconnect]
//! min_ms = 1000
//! max_ms = 15000
//! factor = 2.0
//!
//! [gateway.rate_limit]
//! max_concurrency = 3
//! min_interval_ms = 200
//!
//! [gateway.whitelist]
//! groups = [123456]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use onebridge_core::{ClientConfig, ServerConfig};

/// Which side dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// The adapter dials the gateway.
    #[default]
    Outbound,
    /// The adapter listens and the gateway dials in.
    Inbound,
}

/// Gateway adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Connection mode.
    pub mode: ConnectionMode,
    /// Gateway URL (outbound mode).
    pub url: String,
    /// Shared token. Sent as a bearer header when dialing, required from
    /// peers when listening.
    pub access_token: Option<String>,
    /// Reconnect behavior (outbound mode).
    pub reconnect: ReconnectConfig,
    /// Default per-call deadline in milliseconds.
    pub call_timeout_ms: u64,
    /// Whether calls issued while disconnected wait for the next open.
    pub wait_for_open: bool,
    /// Outbound call rate limiting.
    pub rate_limit: RateLimitConfig,
    /// Opt-in retry policy for [`call_with_retry`](crate::OneBotClient::call_with_retry).
    pub retry: RetryConfig,
    /// Event deduplication.
    pub dedup: DedupConfig,
    /// Per-event log line verbosity.
    pub event_summary: EventSummary,
    /// Group/user allow-list for message events.
    pub whitelist: WhitelistConfig,
    /// Listen address (inbound mode).
    pub listen: ListenConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Outbound,
            url: "ws://127.0.0.1:3001".to_string(),
            access_token: None,
            reconnect: ReconnectConfig::default(),
            call_timeout_ms: 30_000,
            wait_for_open: false,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            dedup: DedupConfig::default(),
            event_summary: EventSummary::default(),
            whitelist: WhitelistConfig::default(),
            listen: ListenConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Default per-call deadline.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Access token with empty strings treated as unset.
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Outbound client settings derived from this config.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            auto_reconnect: self.reconnect.enabled,
            max_retries: None,
            initial_delay: Duration::from_millis(self.reconnect.min_ms),
            max_delay: Duration::from_millis(self.reconnect.max_ms),
            backoff_multiplier: self.reconnect.factor,
            access_token: None,
        };
        if let Some(token) = self.token() {
            config = config.with_token(token);
        }
        config
    }

    /// Inbound server settings derived from this config.
    pub fn server_config(&self) -> ServerConfig {
        let config = ServerConfig::new(self.listen.bind_addr(), self.listen.path.clone());
        match self.token() {
            Some(token) => config.with_token(token),
            None => config,
        }
    }
}

/// Outbound reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether to reconnect after an unexpected close.
    pub enabled: bool,
    /// First delay in milliseconds.
    pub min_ms: u64,
    /// Delay cap in milliseconds.
    pub max_ms: u64,
    /// Growth factor per attempt.
    pub factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_ms: 1000,
            max_ms: 15_000,
            factor: 2.0,
        }
    }
}

/// Outbound call rate limiting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum calls in flight (0 = unlimited).
    pub max_concurrency: usize,
    /// Minimum spacing between consecutive dispatches in milliseconds.
    pub min_interval_ms: u64,
}

/// Opt-in retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds.
    pub initial_delay_ms: u64,
    /// Growth factor per attempt.
    pub backoff_factor: f64,
    /// Symmetric jitter as a fraction of the delay (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            jitter: 0.2,
        }
    }
}

/// Event deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Whether duplicate message events are suppressed.
    pub enabled: bool,
    /// How long a fingerprint is remembered in milliseconds.
    pub ttl_ms: u64,
    /// Maximum remembered fingerprints.
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
            max_entries: 10_000,
        }
    }
}

/// Per-event log line verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSummary {
    /// No per-event line.
    Off,
    /// Kind and identifiers.
    #[default]
    Brief,
    /// Identifiers and plain text.
    Full,
}

/// Group/user allow-list.
///
/// Empty lists disable filtering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitelistConfig {
    /// Allowed group IDs.
    pub groups: Vec<i64>,
    /// Allowed user IDs.
    pub users: Vec<i64>,
}

impl WhitelistConfig {
    /// Whether any list is configured.
    pub fn is_active(&self) -> bool {
        !self.groups.is_empty() || !self.users.is_empty()
    }
}

/// Inbound listen address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// WebSocket path.
    pub path: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6701,
            path: "/onebot/v11/ws".to_string(),
        }
    }
}

impl ListenConfig {
    /// Returns the bind address string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
