//! Transport capability traits.
//!
//! Adapters never touch sockets directly. They ask the [`TransportContext`]
//! for the capability matching their connection mode and hand it a
//! [`ConnectionHandler`](crate::ConnectionHandler).

use std::sync::Arc;

use async_trait::async_trait;

use crate::backoff::ClientConfig;
use crate::connection::{BoxedConnectionHandler, ClientHandle, ListenerHandle};
use crate::error::TransportResult;

/// Settings for a listening WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, `host:port`.
    pub addr: String,
    /// Route path, e.g. `/onebot/v11/ws`.
    pub path: String,
    /// Shared token required from peers, if any.
    ///
    /// Accepted as `?access_token=` query parameter or as an
    /// `Authorization: Bearer` header.
    pub access_token: Option<String>,
}

impl ServerConfig {
    /// Creates a server config without authentication.
    pub fn new(addr: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            path: path.into(),
            access_token: None,
        }
    }

    /// Requires peers to present this token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into()).filter(|t: &String| !t.is_empty());
        self
    }
}

/// WebSocket server capability.
#[async_trait]
pub trait WsServerCapability: Send + Sync {
    /// Starts listening. Each accepted connection is driven by `handler`.
    ///
    /// Bind failure is returned; everything after that is reported through
    /// the handler.
    async fn listen(
        &self,
        config: ServerConfig,
        handler: BoxedConnectionHandler,
    ) -> TransportResult<ListenerHandle>;
}

/// WebSocket client capability.
#[async_trait]
pub trait WsClientCapability: Send + Sync {
    /// Starts a client supervisor for `url`.
    ///
    /// Returns immediately; dialing, reconnecting and backoff happen in the
    /// background and are reported through `handler`.
    async fn connect(
        &self,
        url: &str,
        handler: BoxedConnectionHandler,
        config: ClientConfig,
    ) -> TransportResult<ClientHandle>;
}

/// The set of transport capabilities available to adapters.
#[derive(Clone, Default)]
pub struct TransportContext {
    ws_server: Option<Arc<dyn WsServerCapability>>,
    ws_client: Option<Arc<dyn WsClientCapability>>,
}

impl TransportContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the WebSocket server capability.
    pub fn with_ws_server(mut self, capability: Arc<dyn WsServerCapability>) -> Self {
        self.ws_server = Some(capability);
        self
    }

    /// Registers the WebSocket client capability.
    pub fn with_ws_client(mut self, capability: Arc<dyn WsClientCapability>) -> Self {
        self.ws_client = Some(capability);
        self
    }

    /// Returns the WebSocket server capability, if available.
    pub fn ws_server(&self) -> Option<&Arc<dyn WsServerCapability>> {
        self.ws_server.as_ref()
    }

    /// Returns the WebSocket client capability, if available.
    pub fn ws_client(&self) -> Option<&Arc<dyn WsClientCapability>> {
        self.ws_client.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_context_empty() {
        let ctx = TransportContext::new();
        assert!(ctx.ws_server().is_none());
        assert!(ctx.ws_client().is_none());
    }

    #[test]
    fn test_server_config_ignores_empty_token() {
        let config = ServerConfig::new("0.0.0.0:6199", "/ws").with_token("");
        assert!(config.access_token.is_none());
        let config = ServerConfig::new("0.0.0.0:6199", "/ws").with_token("s3cret");
        assert_eq!(config.access_token.as_deref(), Some("s3cret"));
    }
}
