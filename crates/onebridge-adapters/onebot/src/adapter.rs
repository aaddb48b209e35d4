//! The gateway adapter lifecycle object.
//!
//! [`OneBotAdapter`] owns the link, correlator and dispatcher for one
//! gateway. It is an ordinary value: tests build one, attach an in-memory
//! connection through [`connection_handler`](OneBotAdapter::connection_handler),
//! and drive it without any socket.
//!
//! ```rust,ignore
//! let adapter = OneBotAdapter::new(config.gateway.clone());
//! adapter.on(EventKind::Message, |event: Arc<GatewayEvent>| async move {
//!     tracing::info!(?event, "got message");
//!     Ok(())
//! });
//! adapter.start(&onebridge_transport::default_context()).await?;
//! let pong = adapter.client().call("get_status", json!({})).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use onebridge_core::{
    ApiResult, BoxedConnectionHandler, CLOSE_SUPERSEDED, ClientHandle, CloseReason,
    ConnectionHandle, ConnectionHandler, ConnectionInfo, ListenerHandle, TransportContext,
    TransportError, TransportResult,
};

use crate::api_caller::ApiCaller;
use crate::client::OneBotClient;
use crate::config::{ConnectionMode, GatewayConfig};
use crate::correlator::CallCorrelator;
use crate::dispatcher::{EventDispatcher, EventListener, FrameOutcome};
use crate::link::{GatewayLink, LinkEvent};
use crate::model::EventKind;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// What keeps the connection alive while the adapter runs.
enum Running {
    Client(ClientHandle),
    Listener(ListenerHandle),
}

/// The OneBot v11 gateway adapter.
pub struct OneBotAdapter {
    config: GatewayConfig,
    link: Arc<GatewayLink>,
    correlator: Arc<CallCorrelator>,
    dispatcher: Arc<EventDispatcher>,
    running: Mutex<Option<Running>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OneBotAdapter {
    /// Creates an adapter. Nothing connects until [`start`](Self::start).
    ///
    /// Must be called inside a tokio runtime; the dispatch worker is spawned
    /// here.
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let link = Arc::new(GatewayLink::new());
        let correlator = Arc::new(CallCorrelator::new(
            Arc::clone(&link),
            RateLimiter::from_config(&config.rate_limit),
            config.call_timeout(),
            config.wait_for_open,
        ));
        let dispatcher = Arc::new(EventDispatcher::new(&config, Arc::clone(&correlator)));
        let worker = dispatcher.start();

        Arc::new(Self {
            config,
            link,
            correlator,
            dispatcher,
            running: Mutex::new(None),
            worker: Mutex::new(worker),
        })
    }

    /// Returns the adapter configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Starts the connection for the configured mode.
    ///
    /// In inbound mode a bind failure is returned; in outbound mode dialing
    /// happens in the background and failures surface as
    /// [`LinkEvent::Failed`].
    pub async fn start(&self, transport: &TransportContext) -> TransportResult<()> {
        let handler = self.connection_handler();
        let running = match self.config.mode {
            ConnectionMode::Outbound => {
                let ws_client = transport.ws_client().ok_or(TransportError::NotAvailable {
                    transport: "ws-client",
                })?;
                info!(
                    url = %self.config.url,
                    has_token = self.config.token().is_some(),
                    "Connecting to gateway"
                );
                let handle = ws_client
                    .connect(&self.config.url, handler, self.config.client_config())
                    .await?;
                Running::Client(handle)
            }
            ConnectionMode::Inbound => {
                let ws_server = transport.ws_server().ok_or(TransportError::NotAvailable {
                    transport: "ws-server",
                })?;
                let server_config = self.config.server_config();
                info!(
                    addr = %server_config.addr,
                    path = %server_config.path,
                    "Waiting for gateway to connect"
                );
                let handle = ws_server.listen(server_config, handler).await?;
                Running::Listener(handle)
            }
        };

        if let Some(previous) = self.running.lock().replace(running) {
            warn!("Adapter was already started, replacing previous connection");
            stop(previous);
        }
        Ok(())
    }

    /// Tears down the connection, cancels reconnects and rejects every
    /// pending call with `ConnectionLost`.
    pub fn close(&self) {
        if let Some(running) = self.running.lock().take() {
            stop(running);
        }
        if let Some(conn_id) = self.link.close() {
            self.link.publish(LinkEvent::Closed {
                conn_id,
                code: None,
                reason: "adapter closed".into(),
            });
        }
        self.correlator.fail_all();
        info!("Gateway adapter closed");
    }

    /// The connection handler that feeds this adapter.
    ///
    /// Transports drive it; tests can call it directly with an in-memory
    /// [`ConnectionHandle`].
    pub fn connection_handler(&self) -> BoxedConnectionHandler {
        Arc::new(GatewayConnectionHandler {
            link: Arc::clone(&self.link),
            correlator: Arc::clone(&self.correlator),
            dispatcher: Arc::clone(&self.dispatcher),
        })
    }

    /// Registers an event listener.
    pub fn on(&self, kind: EventKind, listener: impl EventListener + 'static) {
        self.dispatcher.on(kind, listener);
    }

    /// The event dispatcher.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe_link(&self) -> broadcast::Receiver<LinkEvent> {
        self.link.subscribe()
    }

    /// Whether a gateway connection is open.
    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    /// Resolves once a gateway connection is open.
    pub async fn wait_for_open(&self) {
        self.link.wait_for_open().await;
    }

    /// Issues a raw call and returns the full response object.
    pub async fn invoke(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> ApiResult<Value> {
        self.correlator.invoke(action, params, timeout).await
    }

    /// The call seam, for collaborators that only need to issue calls.
    pub fn caller(&self) -> Arc<dyn ApiCaller> {
        Arc::clone(&self.correlator) as Arc<dyn ApiCaller>
    }

    /// A typed API client using the configured retry policy.
    pub fn client(&self) -> OneBotClient {
        OneBotClient::new(self.caller()).with_retry(RetryPolicy::from_config(&self.config.retry))
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }
}

impl Drop for OneBotAdapter {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

fn stop(running: Running) {
    match running {
        Running::Client(handle) => handle.close(),
        Running::Listener(handle) => handle.stop(),
    }
}

/// Bridges transport callbacks into the link, correlator and dispatcher.
struct GatewayConnectionHandler {
    link: Arc<GatewayLink>,
    correlator: Arc<CallCorrelator>,
    dispatcher: Arc<EventDispatcher>,
}

#[async_trait]
impl ConnectionHandler for GatewayConnectionHandler {
    async fn on_connect(&self, conn_info: ConnectionInfo) -> TransportResult<String> {
        // Gateways announce their account in `X-Self-ID`; headers are lowercase.
        let self_id = conn_info.metadata.get("x-self-id").cloned();
        let conn_id = format!("gw-{}", uuid::Uuid::new_v4().simple());
        info!(
            conn_id = %conn_id,
            self_id = ?self_id,
            remote_addr = ?conn_info.remote_addr,
            "Gateway connection established"
        );
        Ok(conn_id)
    }

    async fn on_ready(&self, conn_id: &str, connection: ConnectionHandle) {
        if let Some(previous) = self.link.attach(connection) {
            warn!(
                previous = %previous.id,
                current = %conn_id,
                "New gateway connection supersedes the previous one"
            );
            // Close first so no call can still be sent on it once its
            // pending entries are failed.
            previous.close_with(CLOSE_SUPERSEDED, "superseded by a newer connection");
            self.correlator.fail_conn(&previous.id);
        }
    }

    async fn on_message(&self, conn_id: &str, frame: &str) {
        if self.dispatcher.on_frame(frame) == FrameOutcome::Malformed {
            trace!(conn_id = %conn_id, "Malformed frame dropped");
        }
    }

    async fn on_disconnect(&self, conn_id: &str, reason: CloseReason) {
        if !self.link.detach(conn_id) {
            return;
        }
        info!(
            conn_id = %conn_id,
            code = ?reason.code,
            reason = %reason.reason,
            "Gateway connection closed"
        );
        self.correlator.fail_conn(conn_id);
        self.link.publish(LinkEvent::Closed {
            conn_id: conn_id.to_string(),
            code: reason.code,
            reason: reason.reason,
        });
    }

    async fn on_error(&self, conn_id: &str, error: &str) {
        warn!(conn_id = %conn_id, error = %error, "Gateway connection error");
        self.link.publish(LinkEvent::Failed {
            conn_id: conn_id.to_string(),
            error: error.to_string(),
        });
    }

    async fn on_connect_failed(&self, target: &str, error: &TransportError) {
        warn!(target = %target, error = %error, "Gateway dial failed");
        self.link.publish(LinkEvent::Failed {
            conn_id: target.to_string(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onebridge_core::ApiError;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::model::GatewayEvent;

    async fn connect(
        handler: &BoxedConnectionHandler,
    ) -> (String, ConnectionHandle, mpsc::Receiver<String>) {
        let conn_id = handler
            .on_connect(ConnectionInfo::new("memory"))
            .await
            .unwrap();
        let (handle, rx) = ConnectionHandle::in_memory(conn_id.clone(), 16);
        handler.on_ready(&conn_id, handle.clone()).await;
        (conn_id, handle, rx)
    }

    fn echo_of(frame: &str) -> String {
        let value: Value = serde_json::from_str(frame).unwrap();
        value["echo"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_invoke_round_trip_through_handler() {
        let adapter = OneBotAdapter::new(GatewayConfig::default());
        let handler = adapter.connection_handler();
        let (conn_id, _handle, mut rx) = connect(&handler).await;
        assert!(adapter.is_open());

        let call = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.invoke("ping", json!({}), None).await })
        };
        let frame = rx.recv().await.unwrap();
        let request: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(request["action"], "ping");

        let response = json!({"status": "ok", "retcode": 0, "data": "pong", "echo": echo_of(&frame)});
        handler.on_message(&conn_id, &response.to_string()).await;
        assert_eq!(call.await.unwrap().unwrap()["data"], "pong");
    }

    #[tokio::test]
    async fn test_disconnect_rejects_pending_and_publishes() {
        let adapter = OneBotAdapter::new(GatewayConfig::default());
        let mut link_events = adapter.subscribe_link();
        let handler = adapter.connection_handler();
        let (conn_id, _handle, mut rx) = connect(&handler).await;

        let call = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.invoke("slow", json!({}), None).await })
        };
        rx.recv().await.unwrap();
        assert_eq!(adapter.pending_calls(), 1);

        handler
            .on_disconnect(&conn_id, CloseReason::new(1006, "gone"))
            .await;
        assert!(matches!(call.await.unwrap(), Err(ApiError::ConnectionLost)));
        assert!(!adapter.is_open());

        assert!(matches!(link_events.recv().await.unwrap(), LinkEvent::Opened { .. }));
        assert_eq!(
            link_events.recv().await.unwrap(),
            LinkEvent::Closed {
                conn_id,
                code: Some(1006),
                reason: "gone".into()
            }
        );
    }

    #[tokio::test]
    async fn test_newer_connection_supersedes_older() {
        let adapter = OneBotAdapter::new(GatewayConfig::default());
        let handler = adapter.connection_handler();
        let (first_id, first, mut first_rx) = connect(&handler).await;

        let call = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.invoke("slow", json!({}), None).await })
        };
        first_rx.recv().await.unwrap();

        let (_second_id, _second, mut second_rx) = connect(&handler).await;
        assert!(matches!(call.await.unwrap(), Err(ApiError::ConnectionLost)));
        assert_eq!(first.close_reason().and_then(|r| r.code), Some(CLOSE_SUPERSEDED));

        // The old connection's close does not detach the new one.
        handler
            .on_disconnect(&first_id, CloseReason::new(CLOSE_SUPERSEDED, "superseded"))
            .await;
        assert!(adapter.is_open());

        let call = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.invoke("ping", json!({}), None).await })
        };
        assert!(second_rx.recv().await.is_some());
        adapter.close();
        assert!(matches!(call.await.unwrap(), Err(ApiError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_events_reach_listeners() {
        let adapter = OneBotAdapter::new(GatewayConfig::default());
        let (tx, mut events) = mpsc::unbounded_channel();
        adapter.on(EventKind::Message, move |event: Arc<GatewayEvent>| {
            let tx = tx.clone();
            async move {
                tx.send(event)?;
                Ok::<(), anyhow::Error>(())
            }
        });

        let handler = adapter.connection_handler();
        let (conn_id, _handle, _rx) = connect(&handler).await;
        let frame = json!({
            "post_type": "message", "time": 1, "self_id": 9, "message_type": "private",
            "message_id": 3, "user_id": 4, "message": "hello"
        });
        handler.on_message(&conn_id, &frame.to_string()).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.as_message().unwrap().plain_text(), "hello");
    }

    #[tokio::test]
    async fn test_start_without_capability_fails() {
        let adapter = OneBotAdapter::new(GatewayConfig::default());
        let err = adapter.start(&TransportContext::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotAvailable { .. }));
    }
}
