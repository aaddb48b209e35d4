//! # onebridge Core
//!
//! Shared building blocks for the onebridge gateway adapter:
//!
//! - **Errors**: [`TransportError`] for socket-level failures and
//!   [`ApiError`] for the call-level kinds surfaced to callers.
//! - **Connections**: the [`ConnectionHandler`] lifecycle trait and the
//!   [`ConnectionHandle`] / [`ClientHandle`] / [`ListenerHandle`] handles.
//! - **Capabilities**: [`WsClientCapability`] and [`WsServerCapability`],
//!   implemented by `onebridge-transport` and consumed by adapters through a
//!   [`TransportContext`].
//! - **Backoff**: [`Backoff`] and [`ClientConfig`] for outbound reconnects.
//!
//! ```text
//! ┌─────────────────────┐
//! │  Adapter / Broadcast│  (uses capabilities)
//! ├─────────────────────┤
//! │  onebridge-core     │  <- This crate (traits, handles, errors)
//! ├─────────────────────┤
//! │  onebridge-transport│  (WebSocket client/server)
//! └─────────────────────┘
//! ```

pub mod backoff;
pub mod capability;
pub mod connection;
pub mod error;

pub use backoff::{Backoff, ClientConfig};
pub use capability::{ServerConfig, TransportContext, WsClientCapability, WsServerCapability};
pub use connection::{
    BoxedConnectionHandler, CLOSE_GOING_AWAY, CLOSE_SUPERSEDED, CLOSE_UNAUTHORIZED, ClientHandle,
    CloseReason, ConnectionHandle, ConnectionHandler, ConnectionInfo, ListenerHandle,
};
pub use error::{ApiError, ApiResult, TransportError, TransportResult};
