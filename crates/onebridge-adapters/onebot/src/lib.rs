//! # onebridge Adapter for OneBot v11
//!
//! Bridges an application to a OneBot v11 gateway over one WebSocket
//! connection, in either direction:
//!
//! - **outbound**: the adapter dials the gateway and reconnects with backoff
//! - **inbound**: the adapter listens and the gateway dials in; the newest
//!   connection supersedes any previous one
//!
//! ## Components
//!
//! ```text
//! frame ──► EventDispatcher ──► response ──► CallCorrelator ──► waiting call
//!                 │
//!                 └─► event ─► Deduplicator ─► MessageFilter ─► listeners
//!
//! call ──► RateLimiter ──► CallCorrelator ──► GatewayLink ──► gateway
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use onebridge_adapter_onebot::{EventKind, GatewayConfig, GatewayEvent, OneBotAdapter};
//!
//! let adapter = OneBotAdapter::new(GatewayConfig::default());
//! adapter.on(EventKind::Message, |event: Arc<GatewayEvent>| async move {
//!     println!("{:?}", event.as_message().map(|m| m.plain_text()));
//!     Ok(())
//! });
//! adapter.start(&onebridge_transport::default_context()).await?;
//! let me = adapter.client().get_login_info().await?;
//! ```

pub mod adapter;
pub mod api_caller;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod link;
pub mod model;
pub mod rate_limit;
pub mod retry;

pub use adapter::OneBotAdapter;
pub use api_caller::ApiCaller;
pub use client::OneBotClient;
pub use config::{
    ConnectionMode, DedupConfig, EventSummary, GatewayConfig, ListenConfig, RateLimitConfig,
    ReconnectConfig, RetryConfig, WhitelistConfig,
};
pub use correlator::CallCorrelator;
pub use dedup::{Deduplicator, fingerprint};
pub use dispatcher::{BoxedEventListener, EventDispatcher, EventListener, FrameOutcome};
pub use error::{FrameError, FrameResult};
pub use filter::{MessageFilter, Rejection};
pub use link::{GatewayLink, LinkEvent};
pub use model::{
    ApiResponse, EventKind, GatewayEvent, InboundFrame, MessageEvent, MessageType, MetaEvent,
    NoticeEvent, RequestEvent, Segment, Sender,
};
pub use rate_limit::{RatePermit, RateLimiter};
pub use retry::RetryPolicy;
