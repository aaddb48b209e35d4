//! WebSocket client capability implementation (outbound mode).

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use onebridge_core::{
    Backoff, BoxedConnectionHandler, CLOSE_GOING_AWAY, ClientConfig, ClientHandle, CloseReason,
    ConnectionHandle, ConnectionInfo, TransportError, TransportResult, WsClientCapability,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client capability implementation.
pub struct WsClientCapabilityImpl;

impl WsClientCapabilityImpl {
    /// Creates a new WebSocket client capability.
    pub fn new() -> Self {
        Self
    }
}

impl Default for WsClientCapabilityImpl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WsClientCapability for WsClientCapabilityImpl {
    async fn connect(
        &self,
        url: &str,
        handler: BoxedConnectionHandler,
        config: ClientConfig,
    ) -> TransportResult<ClientHandle> {
        // Validate the request up front so a bad URL is a configuration
        // error rather than an endless reconnect loop.
        build_request(url, config.access_token.as_deref())?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_supervisor(
            url.to_string(),
            handler,
            config,
            shutdown_rx,
        ));

        Ok(ClientHandle::new(url, shutdown_tx))
    }
}

/// How a single connection ended.
enum Ended {
    /// The client handle was closed; stop for good.
    Shutdown,
    /// The connection dropped; the supervisor may reconnect.
    Closed,
}

fn build_request(
    url: &str,
    token: Option<&str>,
) -> TransportResult<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidConfig(format!("invalid url {url}: {e}")))?;
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::InvalidConfig(format!("invalid access token: {e}")))?;
        request.headers_mut().insert("Authorization", value);
    }
    Ok(request)
}

async fn dial(url: &str, config: &ClientConfig) -> TransportResult<WsStream> {
    let request = build_request(url, config.access_token.as_deref())?;
    let (stream, _response) =
        connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
    Ok(stream)
}

/// Returns once the shutdown flag is set or every client handle is gone.
async fn wait_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Dials, runs the connection, and reconnects with backoff until shut down.
async fn run_supervisor(
    url: String,
    handler: BoxedConnectionHandler,
    config: ClientConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = config.backoff();
    let mut failures = 0u32;

    loop {
        info!(url = %url, "Connecting to WebSocket server");

        let dialed = tokio::select! {
            result = dial(&url, &config) => result,
            () = wait_shutdown(&mut shutdown_rx) => break,
        };

        match dialed {
            Ok(stream) => {
                failures = 0;
                match run_connection(stream, &handler, &url, &mut shutdown_rx, &mut backoff).await
                {
                    Ended::Shutdown => break,
                    Ended::Closed => {}
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "WebSocket connection failed");
                handler.on_connect_failed(&url, &e).await;
                failures = failures.saturating_add(1);
                if let Some(max) = config.max_retries
                    && failures > max
                {
                    error!(url = %url, attempts = failures, "Max retries reached, giving up");
                    break;
                }
            }
        }

        if !config.auto_reconnect {
            info!(url = %url, "Auto-reconnect disabled, client stopped");
            break;
        }

        let delay = backoff.next_delay();
        warn!(url = %url, delay = ?delay, attempt = backoff.attempts(), "Reconnecting...");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = wait_shutdown(&mut shutdown_rx) => break,
        }
    }

    debug!(url = %url, "WebSocket client supervisor finished");
}

/// Drives one established connection until it closes.
///
/// The backoff is reset once the first frame arrives, which marks the
/// reopen as stable.
async fn run_connection(
    stream: WsStream,
    handler: &BoxedConnectionHandler,
    url: &str,
    shutdown_rx: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> Ended {
    let (mut ws_tx, mut ws_rx) = stream.split();

    let conn_info = ConnectionInfo::new("websocket").with_metadata("url", url);
    let conn_id = match handler.on_connect(conn_info).await {
        Ok(id) => id,
        Err(e) => {
            warn!(url = %url, error = %e, "Connection refused by handler");
            let _ = ws_tx.close().await;
            return Ended::Closed;
        }
    };

    let (message_tx, mut message_rx) = mpsc::channel::<String>(256);
    let (close_tx, _) = watch::channel(None);
    let handle = ConnectionHandle::new(conn_id.clone(), message_tx, close_tx);
    let local = handle.clone();
    handler.on_ready(&conn_id, handle).await;

    info!(conn_id = %conn_id, url = %url, "WebSocket client connected");

    let mut stable = false;
    let (reason, ended) = loop {
        tokio::select! {
            () = wait_shutdown(shutdown_rx) => {
                info!(conn_id = %conn_id, "WebSocket client shutting down");
                let _ = ws_tx.send(close_message(CLOSE_GOING_AWAY, "client shutdown")).await;
                break (CloseReason::new(CLOSE_GOING_AWAY, "client shutdown"), Ended::Shutdown);
            }

            reason = local.closed() => {
                info!(conn_id = %conn_id, code = ?reason.code, "Connection closed locally");
                let code = reason.code.unwrap_or(CLOSE_GOING_AWAY);
                let _ = ws_tx.send(close_message(code, &reason.reason)).await;
                break (reason, Ended::Closed);
            }

            Some(frame) = message_rx.recv() => {
                trace!(conn_id = %conn_id, len = frame.len(), "Sending frame");
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    warn!(conn_id = %conn_id, error = %e, "Failed to send frame");
                    break (CloseReason::abnormal(e.to_string()), Ended::Closed);
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        trace!(conn_id = %conn_id, len = text.len(), "Received text");
                        if !stable {
                            stable = true;
                            backoff.reset();
                        }
                        handler.on_message(&conn_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        trace!(conn_id = %conn_id, len = data.len(), "Received binary");
                        match std::str::from_utf8(&data) {
                            Ok(text) => handler.on_message(&conn_id, text).await,
                            Err(e) => warn!(conn_id = %conn_id, error = %e, "Dropping non-UTF-8 frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        trace!(conn_id = %conn_id, "Received ping, sending pong");
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        trace!(conn_id = %conn_id, "Received pong");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => CloseReason::new(u16::from(f.code), f.reason.as_str()),
                            None => CloseReason::abnormal("closed without frame"),
                        };
                        info!(conn_id = %conn_id, code = ?reason.code, reason = %reason.reason, "Server closed connection");
                        break (reason, Ended::Closed);
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                        handler.on_error(&conn_id, &e.to_string()).await;
                        break (CloseReason::abnormal(e.to_string()), Ended::Closed);
                    }
                    None => {
                        info!(conn_id = %conn_id, "WebSocket stream ended");
                        break (CloseReason::abnormal("stream ended"), Ended::Closed);
                    }
                }
            }
        }
    };

    handler.on_disconnect(&conn_id, reason).await;
    ended
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        connects: AtomicUsize,
        failures: AtomicUsize,
        frames: Mutex<Vec<String>>,
        handles: Mutex<Vec<ConnectionHandle>>,
        disconnects: Mutex<Vec<CloseReason>>,
    }

    #[async_trait]
    impl onebridge_core::ConnectionHandler for Recorder {
        async fn on_connect(&self, _info: ConnectionInfo) -> TransportResult<String> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(format!("conn-{n}"))
        }

        async fn on_ready(&self, _conn_id: &str, connection: ConnectionHandle) {
            self.handles.lock().await.push(connection);
        }

        async fn on_message(&self, _conn_id: &str, frame: &str) {
            self.frames.lock().await.push(frame.to_string());
        }

        async fn on_disconnect(&self, _conn_id: &str, reason: CloseReason) {
            self.disconnects.lock().await.push(reason);
        }

        async fn on_error(&self, _conn_id: &str, _error: &str) {}

        async fn on_connect_failed(&self, _target: &str, _error: &TransportError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_build_request_adds_bearer_token() {
        let request = build_request("ws://127.0.0.1:6700/ws", Some("abc")).unwrap();
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Bearer abc"
        );
        let request = build_request("ws://127.0.0.1:6700/ws", None).unwrap();
        assert!(request.headers().get("Authorization").is_none());
    }

    #[test]
    fn test_build_request_rejects_bad_url() {
        assert!(build_request("not a url", None).is_err());
    }

    #[tokio::test]
    async fn test_client_exchanges_frames_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text("hello".into())).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(format!("echo:{text}").into()))
                    .await
                    .unwrap();
            }
            // Keep the socket open until the client goes away.
            while ws.next().await.is_some() {}
        });

        let recorder = Arc::new(Recorder::default());
        let client = WsClientCapabilityImpl::new()
            .connect(
                &format!("ws://{addr}"),
                recorder.clone(),
                ClientConfig::no_reconnect(),
            )
            .await
            .unwrap();

        let handle = loop {
            if let Some(h) = recorder.handles.lock().await.first().cloned() {
                break h;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        handle.send("ping".into()).await.unwrap();

        for _ in 0..200 {
            if recorder.frames.lock().await.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            *recorder.frames.lock().await,
            vec!["hello".to_string(), "echo:ping".to_string()]
        );

        client.close();
        for _ in 0..200 {
            if !recorder.disconnects.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let disconnects = recorder.disconnects.lock().await;
        assert_eq!(disconnects[0].code, Some(CLOSE_GOING_AWAY));
    }

    #[tokio::test]
    async fn test_client_reports_dial_failure_without_reconnect() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        let _client = WsClientCapabilityImpl::new()
            .connect(
                &format!("ws://{addr}"),
                recorder.clone(),
                ClientConfig::no_reconnect(),
            )
            .await
            .unwrap();

        for _ in 0..200 {
            if recorder.failures.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.failures.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);
    }
}
