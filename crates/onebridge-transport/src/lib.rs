//! # onebridge Transport
//!
//! WebSocket implementations of the capabilities defined in `onebridge-core`.
//!
//! ## Features
//!
//! - `ws-client` (default): outbound client with reconnect backoff
//! - `ws-server` (default): listening server with shared-token auth
//! - `full`: all capabilities
//!
//! ```text
//! ┌─────────────────────┐
//! │  Adapter / Broadcast│  (uses capabilities)
//! ├─────────────────────┤
//! │  onebridge-core     │  (capability traits)
//! ├─────────────────────┤
//! │  onebridge-transport│  <- This crate (implementations)
//! ├─────────────────────┤
//! │  Network (TCP/WS)   │
//! └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onebridge_core::{ClientConfig, WsClientCapability};
//! use onebridge_transport::WsClientCapabilityImpl;
//!
//! let capability = WsClientCapabilityImpl::new();
//! let handle = capability
//!     .connect("ws://127.0.0.1:3001", handler, ClientConfig::default())
//!     .await?;
//! ```

#[cfg(any(feature = "ws-client", feature = "ws-server"))]
pub mod websocket;

#[cfg(feature = "ws-server")]
pub use websocket::{WsServerCapabilityImpl, presented_token};

#[cfg(feature = "ws-client")]
pub use websocket::WsClientCapabilityImpl;

use std::sync::Arc;

use onebridge_core::TransportContext;

/// Builds a [`TransportContext`] with every capability compiled into this crate.
pub fn default_context() -> TransportContext {
    #[allow(unused_mut)]
    let mut ctx = TransportContext::new();
    #[cfg(feature = "ws-server")]
    {
        ctx = ctx.with_ws_server(Arc::new(WsServerCapabilityImpl::new()));
    }
    #[cfg(feature = "ws-client")]
    {
        ctx = ctx.with_ws_client(Arc::new(WsClientCapabilityImpl::new()));
    }
    ctx
}
