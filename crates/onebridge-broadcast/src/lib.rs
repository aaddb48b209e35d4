//! # onebridge Broadcast
//!
//! Republishes gateway message events to any number of WebSocket
//! subscribers as flattened, enriched records.
//!
//! - [`BroadcastService`]: subscriber endpoint, fan-out and the remote-call
//!   surface (`invoke` / `sdk` frames).
//! - [`Normalizer`]: turns a [`MessageEvent`](onebridge_adapter_onebot::MessageEvent)
//!   into a [`NormalizedEvent`], resolving names and quoted messages through
//!   gateway lookups with fallbacks.
//! - [`summary`]: the deterministic multi-line rendering carried in every
//!   record.
//! - [`protocol`]: subscriber frame types.

pub mod config;
pub mod error;
pub mod normalize;
pub mod protocol;
pub mod sdk;
pub mod service;
pub mod subscriber;
pub mod summary;

pub use config::BroadcastConfig;
pub use error::{BroadcastError, BroadcastResult};
pub use normalize::{Attachment, Attachments, Mention, NormalizedEvent, Normalizer, QuotedMessage};
pub use protocol::{ClientFrame, Inbound, ServerFrame};
pub use service::BroadcastService;
pub use subscriber::{SubscriberRegistry, SubscriberState};
