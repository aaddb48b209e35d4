//! The single governing gateway connection.
//!
//! [`GatewayLink`] holds at most one live [`ConnectionHandle`]. Attaching a
//! new connection supersedes the previous one; detaching is ignored unless
//! it names the current connection, so a late close from a superseded peer
//! never tears down its replacement.

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use onebridge_core::{ApiError, ApiResult, CLOSE_GOING_AWAY, ConnectionHandle};

/// Capacity of the lifecycle event channel.
const LINK_EVENT_CAPACITY: usize = 64;

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection became the governing connection.
    Opened {
        /// Connection ID.
        conn_id: String,
    },
    /// The governing connection closed.
    Closed {
        /// Connection ID.
        conn_id: String,
        /// WebSocket close code, if one was received.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// A connection attempt or live connection failed.
    Failed {
        /// Connection ID or dial target.
        conn_id: String,
        /// Error description.
        error: String,
    },
}

/// Owner of the current gateway connection.
pub struct GatewayLink {
    current: RwLock<Option<ConnectionHandle>>,
    opened: watch::Sender<bool>,
    events: broadcast::Sender<LinkEvent>,
}

impl Default for GatewayLink {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayLink {
    /// Creates a link with no connection.
    pub fn new() -> Self {
        let (opened, _) = watch::channel(false);
        let (events, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        Self {
            current: RwLock::new(None),
            opened,
            events,
        }
    }

    /// Makes `handle` the governing connection.
    ///
    /// Returns the superseded connection, if there was one. The caller is
    /// responsible for failing calls that were in flight on it.
    pub fn attach(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn_id = handle.id.clone();
        let previous = self.current.write().replace(handle);
        self.opened.send_replace(true);
        info!(conn_id = %conn_id, "Gateway connection opened");
        self.publish(LinkEvent::Opened { conn_id });
        previous
    }

    /// Clears the governing connection if it is `conn_id`.
    ///
    /// Returns whether anything was detached.
    pub fn detach(&self, conn_id: &str) -> bool {
        let mut current = self.current.write();
        if current.as_ref().is_some_and(|h| h.id == conn_id) {
            *current = None;
            self.opened.send_replace(false);
            true
        } else {
            debug!(conn_id = %conn_id, "Ignoring detach of non-current connection");
            false
        }
    }

    /// ID of the governing connection.
    pub fn current_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|h| h.id.clone())
    }

    /// The governing connection, if any.
    pub fn current(&self) -> Option<ConnectionHandle> {
        self.current.read().clone()
    }

    /// Whether a usable connection is attached.
    pub fn is_open(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|h| !h.is_closed())
    }

    /// Sends a frame on the governing connection.
    ///
    /// Fails with [`ApiError::ChannelClosed`] when no connection is open.
    pub async fn send(&self, frame: String) -> ApiResult<()> {
        let handle = self.current.read().clone();
        match handle {
            Some(handle) => handle.send(frame).await.map_err(|e| {
                debug!(conn_id = %handle.id, error = %e, "Send on gateway connection failed");
                ApiError::ChannelClosed
            }),
            None => Err(ApiError::ChannelClosed),
        }
    }

    /// Sends a JSON value on the governing connection.
    pub async fn send_json(&self, value: &Value) -> ApiResult<()> {
        self.send(serde_json::to_string(value)?).await
    }

    /// Resolves once a connection is attached.
    pub async fn wait_for_open(&self) {
        let mut rx = self.opened.subscribe();
        // The sender lives as long as `self`, so this cannot fail while borrowed.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Publishes a lifecycle event. Having no subscribers is fine.
    pub fn publish(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    /// Closes and detaches the governing connection.
    pub fn close(&self) -> Option<String> {
        let handle = self.current.write().take();
        self.opened.send_replace(false);
        handle.map(|h| {
            debug!(conn_id = %h.id, code = CLOSE_GOING_AWAY, "Closing gateway connection");
            h.close();
            h.id
        })
    }
}
