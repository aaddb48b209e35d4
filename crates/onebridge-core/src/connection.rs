//! Connection handling and lifecycle types.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{TransportError, TransportResult};

/// Close code sent to peers that fail the shared-token handshake.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Close code sent to a connection replaced by a newer one.
pub const CLOSE_SUPERSEDED: u16 = 4002;

/// Close code sent when the local side shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

// =============================================================================
// Connection Handler
// =============================================================================

/// A handler for connection lifecycle events.
///
/// Transports drive exactly one handler per listener or client. All frames
/// of one connection are delivered in arrival order from a single task.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Called when a new connection is established.
    ///
    /// Returns a unique connection ID, or an error to refuse the connection.
    async fn on_connect(&self, conn_info: ConnectionInfo) -> TransportResult<String>;

    /// Called after the connection is established and its handle is available.
    async fn on_ready(&self, _conn_id: &str, _connection: ConnectionHandle) {}

    /// Called for every text frame received on the connection.
    async fn on_message(&self, conn_id: &str, frame: &str);

    /// Called once when the connection is closed.
    async fn on_disconnect(&self, conn_id: &str, reason: CloseReason);

    /// Called when a connection error occurs.
    async fn on_error(&self, conn_id: &str, error: &str);

    /// Called when an outbound dial attempt fails.
    async fn on_connect_failed(&self, _target: &str, _error: &TransportError) {}
}

/// Boxed connection handler.
pub type BoxedConnectionHandler = Arc<dyn ConnectionHandler>;

/// Information about a connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address (if available).
    pub remote_addr: Option<String>,
    /// Connection protocol (ws, http, etc.).
    pub protocol: String,
    /// Additional metadata. Header names are stored lowercase.
    pub metadata: HashMap<String, String>,
}

impl ConnectionInfo {
    /// Creates new connection info.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            remote_addr: None,
            protocol: protocol.into(),
            metadata: HashMap::new(),
        }
    }

    /// Sets the remote address.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Adds metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code, when the peer sent one.
    pub code: Option<u16>,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseReason {
    /// Creates a close reason with a code.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Creates a close reason without a code (stream ended, I/O error).
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Handle to a listener (server).
///
/// Dropping this handle stops the listener.
#[derive(Debug)]
pub struct ListenerHandle {
    /// Unique identifier for this listener.
    pub id: String,
    /// The address actually bound.
    pub local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ListenerHandle {
    /// Creates a new listener handle.
    pub fn new(
        id: impl Into<String>,
        local_addr: SocketAddr,
        shutdown_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id: id.into(),
            local_addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stops the listener.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Handle to an outbound client supervisor.
///
/// Closing it tears down the live connection and cancels any pending
/// reconnect timer.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Target URL.
    pub url: String,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ClientHandle {
    /// Creates a new client handle.
    pub fn new(url: impl Into<String>, shutdown_tx: watch::Sender<bool>) -> Self {
        Self {
            url: url.into(),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Stops the client and its reconnect loop.
    pub fn close(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Handle to one live duplex connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Unique identifier for this connection.
    pub id: String,
    message_tx: mpsc::Sender<String>,
    close_tx: Arc<watch::Sender<Option<CloseReason>>>,
}

impl ConnectionHandle {
    /// Creates a new connection handle.
    ///
    /// The transport watches `close_tx` and closes the socket with the
    /// requested code once a reason is set.
    pub fn new(
        id: impl Into<String>,
        message_tx: mpsc::Sender<String>,
        close_tx: watch::Sender<Option<CloseReason>>,
    ) -> Self {
        Self {
            id: id.into(),
            message_tx,
            close_tx: Arc::new(close_tx),
        }
    }

    /// Creates a handle backed only by an in-memory channel.
    ///
    /// Frames sent through the handle arrive on the returned receiver.
    pub fn in_memory(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (close_tx, _) = watch::channel(None);
        (Self::new(id, tx, close_tx), rx)
    }

    /// Sends a text frame through this connection.
    pub async fn send(&self, frame: String) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed {
                reason: "connection shut down".into(),
            });
        }
        self.message_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed {
                reason: "writer task ended".into(),
            })
    }

    /// Sends a JSON frame.
    pub async fn send_json(&self, value: &Value) -> TransportResult<()> {
        let frame = serde_json::to_string(value)
            .map_err(|e| TransportError::SendFailed(format!("JSON serialization failed: {e}")))?;
        self.send(frame).await
    }

    /// Queues a text frame without waiting for buffer space.
    ///
    /// Fails with [`TransportError::SendFailed`] when the outgoing buffer is
    /// full, so one slow peer cannot stall a fan-out.
    pub fn try_send(&self, frame: String) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed {
                reason: "connection shut down".into(),
            });
        }
        self.message_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::SendFailed("outgoing buffer full".into())
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed {
                reason: "writer task ended".into(),
            },
        })
    }

    /// Resolves with the requested close reason once
    /// [`close`](Self::close) or [`close_with`](Self::close_with) is called.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.close_tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            // The sender lives in `self`, so this only fails if it is gone.
            if rx.changed().await.is_err() {
                return CloseReason::abnormal("connection handle dropped");
            }
        }
    }

    /// The requested close reason, if closing was requested.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_tx.borrow().clone()
    }

    /// Whether closing was requested or the writer is gone.
    pub fn is_closed(&self) -> bool {
        self.close_tx.borrow().is_some() || self.message_tx.is_closed()
    }

    /// Closes this connection with the going-away code.
    pub fn close(&self) {
        self.close_with(CLOSE_GOING_AWAY, "closed locally");
    }

    /// Closes this connection with a specific code. The first request wins.
    pub fn close_with(&self, code: u16, reason: impl Into<String>) {
        let reason = CloseReason::new(code, reason);
        self.close_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_handle_delivers_frames() {
        let (handle, mut rx) = ConnectionHandle::in_memory("stub", 4);
        handle.send("hello".into()).await.unwrap();
        handle
            .send_json(&serde_json::json!({"action": "ping"}))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "hello");
        assert_eq!(rx.recv().await.unwrap(), r#"{"action":"ping"}"#);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (handle, _rx) = ConnectionHandle::in_memory("stub", 4);
        handle.close();

        assert!(handle.is_closed());
        assert_eq!(handle.closed().await.code, Some(CLOSE_GOING_AWAY));
        let err = handle.send("late".into()).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_first_close_reason_wins() {
        let (handle, _rx) = ConnectionHandle::in_memory("stub", 4);
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.closed().await })
        };
        handle.close_with(CLOSE_SUPERSEDED, "superseded");
        handle.close();

        let reason = waiter.await.unwrap();
        assert_eq!(reason, CloseReason::new(CLOSE_SUPERSEDED, "superseded"));
        assert_eq!(handle.close_reason(), Some(reason));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (handle, rx) = ConnectionHandle::in_memory("stub", 4);
        drop(rx);
        assert!(handle.is_closed());
        assert!(handle.send("x".into()).await.is_err());
    }

    #[test]
    fn test_try_send_reports_full_buffer() {
        let (handle, _rx) = ConnectionHandle::in_memory("stub", 1);
        handle.try_send("one".into()).unwrap();
        let err = handle.try_send("two".into()).unwrap_err();
        assert!(matches!(err, TransportError::SendFailed(_)));
    }

    #[test]
    fn test_connection_info_builder() {
        let info = ConnectionInfo::new("websocket")
            .with_remote_addr("127.0.0.1:1")
            .with_metadata("x-self-id", "10001");
        assert_eq!(info.remote_addr.as_deref(), Some("127.0.0.1:1"));
        assert_eq!(info.metadata.get("x-self-id").map(String::as_str), Some("10001"));
    }
}
