//! # onebridge
//!
//! Connects to a OneBot v11 gateway and republishes its message events to
//! WebSocket subscribers.
//!
//! ```text
//! gateway ◀──▶ OneBotAdapter ──message events──▶ BroadcastService ──▶ subscribers
//!                    ▲                                  │
//!                    └────────── invoke / sdk ──────────┘
//! ```
//!
//! - **Adapter** ([`adapter`]): one gateway connection, dialed or accepted,
//!   with call correlation, dedup and a typed API client
//! - **Broadcast** ([`broadcast`]): normalized event fan-out and remote calls
//!   for subscribers
//! - **Runtime** ([`runtime`]): configuration, logging and lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onebridge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = OneBridgeRuntime::builder().profile("production").build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default), `yaml-config`: configuration file formats
//! - `json-log`: JSON log lines
//! - `ws-client`, `ws-server` (default): transport capabilities

pub use onebridge_adapter_onebot as adapter;
pub use onebridge_broadcast as broadcast;
pub use onebridge_core as core;
pub use onebridge_runtime as runtime;
pub use onebridge_transport as transport;

/// Commonly used types.
pub mod prelude {
    pub use onebridge_adapter_onebot::{
        ApiCaller, EventKind, GatewayConfig, GatewayEvent, MessageEvent, OneBotAdapter,
        OneBotClient,
    };
    pub use onebridge_broadcast::{BroadcastConfig, BroadcastService, NormalizedEvent};
    pub use onebridge_core::{ApiError, ApiResult, TransportContext};
    pub use onebridge_runtime::{AppConfig, OneBridgeRuntime, RuntimeBuilder};

    pub use onebridge_runtime::prelude::*;
}
