//! WebSocket server capability implementation (inbound mode and broadcast).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use subtle::ConstantTimeEq;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use onebridge_core::{
    BoxedConnectionHandler, CLOSE_GOING_AWAY, CLOSE_UNAUTHORIZED, CloseReason, ConnectionHandle,
    ConnectionInfo, ListenerHandle, ServerConfig, TransportError, TransportResult,
    WsServerCapability,
};

/// Close code for connections the handler refused.
const CLOSE_POLICY: u16 = 1008;

/// WebSocket server capability implementation.
pub struct WsServerCapabilityImpl;

impl WsServerCapabilityImpl {
    /// Creates a new WebSocket server capability.
    pub fn new() -> Self {
        Self
    }
}

impl Default for WsServerCapabilityImpl {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state for one listener.
struct ServerState {
    handler: BoxedConnectionHandler,
    access_token: Option<String>,
    /// Live connections by connection ID.
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

#[async_trait]
impl WsServerCapability for WsServerCapabilityImpl {
    async fn listen(
        &self,
        config: ServerConfig,
        handler: BoxedConnectionHandler,
    ) -> TransportResult<ListenerHandle> {
        let state = Arc::new(ServerState {
            handler,
            access_token: config.access_token.clone(),
            connections: RwLock::new(HashMap::new()),
        });

        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };

        let router = Router::new()
            .route(&path, get(ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(&config.addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: config.addr.clone(),
                reason: e.to_string(),
            })?;
        let actual_addr = listener.local_addr()?;

        info!(
            addr = %actual_addr,
            path = %path,
            auth = state.access_token.is_some(),
            "WebSocket server listening"
        );

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let server_state = state.clone();
        tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            );

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!(error = %e, "WebSocket server error");
                    }
                }
                _ = &mut shutdown_rx => {
                    info!(addr = %actual_addr, "WebSocket server shutting down");
                    let connections = server_state.connections.read().await;
                    for handle in connections.values() {
                        handle.close();
                    }
                }
            }
        });

        Ok(ListenerHandle::new(
            format!("ws-server-{actual_addr}"),
            actual_addr,
            shutdown_tx,
        ))
    }
}

/// Extracts the shared token a peer presented, from the `access_token`
/// query parameter or a `Bearer`/`Token` authorization header.
pub fn presented_token(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.get("access_token") {
        return Some(token.clone());
    }
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("Token "))
        .map(|t| t.trim().to_string())
}

/// Compares a presented token with the expected one in constant time.
pub fn token_matches(presented: Option<&str>, expected: &str) -> bool {
    presented.is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    info!(remote_addr = %addr, "New WebSocket connection request");

    let authorized = match state.access_token.as_deref() {
        None => true,
        Some(expected) => token_matches(presented_token(&query, &headers).as_deref(), expected),
    };

    let mut metadata = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value_str) = value.to_str() {
            metadata.insert(name.as_str().to_lowercase(), value_str.to_string());
        }
    }

    ws.on_upgrade(move |socket| async move {
        if authorized {
            handle_socket(socket, addr, state, metadata).await;
        } else {
            warn!(remote_addr = %addr, "Rejecting unauthenticated WebSocket connection");
            reject(socket, CLOSE_UNAUTHORIZED, "unauthorized").await;
        }
    })
}

async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Handles an individual WebSocket connection.
async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    state: Arc<ServerState>,
    headers: HashMap<String, String>,
) {
    let mut conn_info = ConnectionInfo::new("websocket").with_remote_addr(addr.to_string());
    for (key, value) in headers {
        conn_info = conn_info.with_metadata(key, value);
    }

    let conn_id = match state.handler.on_connect(conn_info).await {
        Ok(id) => id,
        Err(e) => {
            warn!(remote_addr = %addr, error = %e, "Connection refused by handler");
            reject(socket, CLOSE_POLICY, "refused").await;
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let (close_tx, _) = watch::channel(None);
    let handle = ConnectionHandle::new(conn_id.clone(), tx, close_tx);
    let local = handle.clone();

    state
        .connections
        .write()
        .await
        .insert(conn_id.clone(), handle.clone());

    info!(conn_id = %conn_id, remote_addr = %addr, "WebSocket connection established");
    state.handler.on_ready(&conn_id, handle).await;

    let handler = state.handler.clone();
    let reason = loop {
        tokio::select! {
            reason = local.closed() => {
                debug!(conn_id = %conn_id, code = ?reason.code, "Closing connection locally");
                // Flush frames queued before the close request.
                while let Ok(frame) = rx.try_recv() {
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: reason.code.unwrap_or(CLOSE_GOING_AWAY),
                        reason: reason.reason.clone().into(),
                    })))
                    .await;
                break reason;
            }

            Some(frame) = rx.recv() => {
                trace!(conn_id = %conn_id, len = frame.len(), "Sending frame");
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    warn!(conn_id = %conn_id, error = %e, "Failed to send frame, connection closed");
                    break CloseReason::abnormal(e.to_string());
                }
            }

            result = ws_rx.next() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        trace!(conn_id = %conn_id, len = text.len(), "Received text message");
                        handler.on_message(&conn_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        trace!(conn_id = %conn_id, len = data.len(), "Received binary message");
                        match std::str::from_utf8(&data) {
                            Ok(text) => handler.on_message(&conn_id, text).await,
                            Err(e) => warn!(conn_id = %conn_id, error = %e, "Dropping non-UTF-8 frame"),
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        trace!(conn_id = %conn_id, "Received ping");
                    }
                    Some(Ok(Message::Pong(_))) => {
                        trace!(conn_id = %conn_id, "Received pong");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(conn_id = %conn_id, "WebSocket connection closed by client");
                        break match frame {
                            Some(f) => CloseReason::new(f.code, f.reason.as_str()),
                            None => CloseReason::abnormal("closed without frame"),
                        };
                    }
                    Some(Err(e)) => {
                        warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                        handler.on_error(&conn_id, &e.to_string()).await;
                        break CloseReason::abnormal(e.to_string());
                    }
                    None => break CloseReason::abnormal("stream ended"),
                }
            }
        }
    };

    state.connections.write().await.remove(&conn_id);
    state.handler.on_disconnect(&conn_id, reason).await;
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::http::HeaderValue;
    use tokio_tungstenite::{connect_async, tungstenite};

    #[derive(Default)]
    struct Counter {
        connects: AtomicUsize,
        frames: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl onebridge_core::ConnectionHandler for Counter {
        async fn on_connect(&self, _info: ConnectionInfo) -> TransportResult<String> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(format!("peer-{n}"))
        }

        async fn on_message(&self, _conn_id: &str, frame: &str) {
            self.frames.lock().await.push(frame.to_string());
        }

        async fn on_disconnect(&self, _conn_id: &str, _reason: CloseReason) {}

        async fn on_error(&self, _conn_id: &str, _error: &str) {}
    }

    #[test]
    fn test_presented_token_sources() {
        let mut query = HashMap::new();
        let mut headers = HeaderMap::new();
        assert_eq!(presented_token(&query, &headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(presented_token(&query, &headers).as_deref(), Some("abc"));

        headers.insert("authorization", HeaderValue::from_static("Token xyz"));
        assert_eq!(presented_token(&query, &headers).as_deref(), Some("xyz"));

        query.insert("access_token".to_string(), "q".to_string());
        assert_eq!(presented_token(&query, &headers).as_deref(), Some("q"));
    }

    #[test]
    fn test_token_matches() {
        assert!(token_matches(Some("secret"), "secret"));
        assert!(!token_matches(Some("secreT"), "secret"));
        assert!(!token_matches(Some("secret-longer"), "secret"));
        assert!(!token_matches(Some(""), "secret"));
        assert!(!token_matches(None, "secret"));
    }

    #[tokio::test]
    async fn test_unauthenticated_peer_is_closed_with_distinct_code() {
        let counter = Arc::new(Counter::default());
        let listener = WsServerCapabilityImpl::new()
            .listen(
                ServerConfig::new("127.0.0.1:0", "/ws").with_token("secret"),
                counter.clone(),
            )
            .await
            .unwrap();

        // Same length as the real token.
        let url = format!("ws://{}/ws?access_token=secreT", listener.local_addr);
        let (mut ws, _) = connect_async(url).await.unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap();
        match msg {
            Some(Ok(tungstenite::Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), CLOSE_UNAUTHORIZED);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(counter.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_authenticated_peer_frames_reach_handler() {
        let counter = Arc::new(Counter::default());
        let listener = WsServerCapabilityImpl::new()
            .listen(
                ServerConfig::new("127.0.0.1:0", "ws").with_token("secret"),
                counter.clone(),
            )
            .await
            .unwrap();

        let url = format!("ws://{}/ws?access_token=secret", listener.local_addr);
        let (mut ws, _) = connect_async(url).await.unwrap();
        ws.send(tungstenite::Message::Text("frame-1".into()))
            .await
            .unwrap();

        for _ in 0..200 {
            if !counter.frames.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*counter.frames.lock().await, vec!["frame-1".to_string()]);
        assert_eq!(counter.connects.load(Ordering::SeqCst), 1);
    }
}
