//! The broadcast service.
//!
//! Subscribers connect over WebSocket, receive a welcome frame, then every
//! published message event as a normalized record. They may also drive the
//! gateway through `invoke` and `sdk` frames.
//!
//! ```rust,ignore
//! let service = BroadcastService::new(config.broadcast.clone(), adapter.caller());
//! service.start(&onebridge_transport::default_context()).await?;
//! adapter.dispatcher().on_boxed(EventKind::Message, service.clone());
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use onebridge_adapter_onebot::model::response_data;
use onebridge_adapter_onebot::{ApiCaller, EventListener, GatewayEvent, MessageEvent, OneBotClient};
use onebridge_core::{
    BoxedConnectionHandler, CloseReason, ConnectionHandle, ConnectionHandler, ConnectionInfo,
    ListenerHandle, TransportContext, TransportError, TransportResult,
};

use crate::config::BroadcastConfig;
use crate::error::BroadcastResult;
use crate::normalize::Normalizer;
use crate::protocol::{ClientFrame, Inbound, ServerFrame, now};
use crate::sdk;
use crate::subscriber::SubscriberRegistry;

const WELCOME: &str = "connected to onebridge broadcast";

/// Republishes message events to WebSocket subscribers.
pub struct BroadcastService {
    config: BroadcastConfig,
    caller: Arc<dyn ApiCaller>,
    client: OneBotClient,
    normalizer: Normalizer,
    registry: Arc<SubscriberRegistry>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl BroadcastService {
    /// Creates a service issuing lookups and remote calls through `caller`.
    pub fn new(config: BroadcastConfig, caller: Arc<dyn ApiCaller>) -> Arc<Self> {
        let client = OneBotClient::new(Arc::clone(&caller));
        let normalizer = Normalizer::new(
            client.clone(),
            config.lookup_timeout(),
            config.include_raw_event,
        );
        Arc::new(Self {
            config,
            caller,
            client,
            normalizer,
            registry: Arc::new(SubscriberRegistry::new()),
            listener: Mutex::new(None),
        })
    }

    /// Returns the service configuration.
    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Opens the subscriber endpoint and returns the bound address.
    pub async fn start(&self, transport: &TransportContext) -> BroadcastResult<SocketAddr> {
        let ws_server = transport.ws_server().ok_or(TransportError::NotAvailable {
            transport: "ws-server",
        })?;
        let server_config = self.config.server_config();
        let path = server_config.path.clone();
        let handle = ws_server
            .listen(server_config, self.connection_handler())
            .await?;
        let addr = handle.local_addr;
        info!(addr = %addr, path = %path, "Broadcast service listening");

        if let Some(previous) = self.listener.lock().replace(handle) {
            warn!("Broadcast service was already started, replacing previous listener");
            previous.stop();
        }
        Ok(addr)
    }

    /// The connection handler for subscriber connections.
    pub fn connection_handler(&self) -> BoxedConnectionHandler {
        Arc::new(SubscriberHandler {
            registry: Arc::clone(&self.registry),
            caller: Arc::clone(&self.caller),
            client: self.client.clone(),
        })
    }

    /// Number of subscribers receiving events.
    pub fn subscriber_count(&self) -> usize {
        self.registry.active_count()
    }

    /// Normalizes `event` and sends it to every active subscriber.
    ///
    /// Does nothing, lookups included, when nobody is subscribed. A
    /// subscriber whose send fails is dropped. Returns how many subscribers
    /// received the record.
    pub async fn push(&self, event: &MessageEvent, context: Option<Value>) -> usize {
        if self.registry.active_count() == 0 {
            trace!(message_id = event.message_id, "No subscribers, skipping broadcast");
            return 0;
        }

        let normalized = self.normalizer.normalize(event, context).await;
        let frame = match (ServerFrame::Message {
            data: Box::new(normalized),
        })
        .to_text()
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!(message_id = event.message_id, error = %e, "Failed to encode broadcast record");
                return 0;
            }
        };

        let mut delivered = 0;
        for handle in self.registry.active() {
            match handle.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(subscriber = %handle.id, error = %e, "Dropping subscriber after failed send");
                    if let Some(handle) = self.registry.remove(&handle.id) {
                        handle.close();
                    }
                }
            }
        }
        debug!(message_id = event.message_id, delivered, "Broadcast event");
        delivered
    }

    /// Notifies subscribers, disconnects them and stops listening.
    pub fn shutdown(&self) {
        let frame = ServerFrame::Shutdown { time: now() }.to_text();
        let subscribers = self.registry.drain();
        let count = subscribers.len();
        for handle in subscribers {
            if let Ok(frame) = &frame {
                let _ = handle.try_send(frame.clone());
            }
            handle.close();
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.stop();
        }
        info!(subscribers = count, "Broadcast service stopped");
    }
}

#[async_trait]
impl EventListener for BroadcastService {
    async fn on_event(&self, event: Arc<GatewayEvent>) -> anyhow::Result<()> {
        if let Some(message) = event.as_message() {
            self.push(message, None).await;
        }
        Ok(())
    }
}

/// Drives subscriber connections.
struct SubscriberHandler {
    registry: Arc<SubscriberRegistry>,
    caller: Arc<dyn ApiCaller>,
    client: OneBotClient,
}

impl SubscriberHandler {
    /// Answers a remote call off the read loop.
    fn answer(&self, conn_id: &str, frame: ClientFrame) {
        let Some(handle) = self.registry.handle(conn_id) else {
            return;
        };
        let caller = Arc::clone(&self.caller);
        let client = self.client.clone();
        tokio::spawn(async move {
            let reply = match frame {
                ClientFrame::Invoke {
                    request_id,
                    action,
                    params,
                } => {
                    debug!(subscriber = %handle.id, action = %action, "Forwarding invoke");
                    let params = if params.is_null() { json!({}) } else { params };
                    match caller.call(&action, params).await {
                        Ok(response) => ServerFrame::ok(request_id, response_data(response)),
                        Err(e) => ServerFrame::err(request_id, e),
                    }
                }
                ClientFrame::Sdk {
                    request_id,
                    path,
                    args,
                } => {
                    debug!(subscriber = %handle.id, path = %path, "Running sdk call");
                    match sdk::call(&client, &path, &args).await {
                        Ok(data) => ServerFrame::ok(request_id, data),
                        Err(e) => ServerFrame::err(request_id, e),
                    }
                }
                ClientFrame::Ping => ServerFrame::Pong { time: now() },
            };
            send(&handle, &reply).await;
        });
    }
}

async fn send(handle: &ConnectionHandle, frame: &ServerFrame) {
    let result = match frame.to_text() {
        Ok(text) => handle.send(text).await,
        Err(e) => Err(TransportError::SendFailed(e.to_string())),
    };
    if let Err(e) = result {
        debug!(subscriber = %handle.id, error = %e, "Reply not delivered");
    }
}

#[async_trait]
impl ConnectionHandler for SubscriberHandler {
    async fn on_connect(&self, conn_info: ConnectionInfo) -> TransportResult<String> {
        let conn_id = format!("sub-{}", uuid::Uuid::new_v4().simple());
        info!(
            subscriber = %conn_id,
            remote_addr = ?conn_info.remote_addr,
            "Subscriber connecting"
        );
        self.registry.connecting(&conn_id, conn_info.remote_addr);
        Ok(conn_id)
    }

    async fn on_ready(&self, conn_id: &str, connection: ConnectionHandle) {
        if !self.registry.open(conn_id, connection.clone()) {
            connection.close();
            return;
        }
        let delivered = match ServerFrame::welcome(WELCOME).to_text() {
            Ok(text) => connection.send(text).await.is_ok(),
            Err(_) => false,
        };
        if delivered {
            self.registry.activate(conn_id);
            info!(subscriber = %conn_id, "Subscriber active");
        } else {
            warn!(subscriber = %conn_id, "Welcome not delivered, dropping subscriber");
            if let Some(handle) = self.registry.remove(conn_id) {
                handle.close();
            }
        }
    }

    async fn on_message(&self, conn_id: &str, frame: &str) {
        match Inbound::parse(frame) {
            Inbound::Frame(ClientFrame::Ping) => {
                if let Some(handle) = self.registry.handle(conn_id) {
                    send(&handle, &ServerFrame::Pong { time: now() }).await;
                }
            }
            Inbound::Frame(frame) => self.answer(conn_id, frame),
            Inbound::UnknownType(kind) => {
                debug!(subscriber = %conn_id, kind = %kind, "Unknown subscriber frame type");
                if let Some(handle) = self.registry.handle(conn_id) {
                    let reply = ServerFrame::Error {
                        message: format!("unknown frame type '{kind}'"),
                    };
                    send(&handle, &reply).await;
                }
            }
            Inbound::BadRequest { request_id, reason } => {
                debug!(subscriber = %conn_id, reason = %reason, "Rejecting invalid request");
                if let Some(handle) = self.registry.handle(conn_id) {
                    send(&handle, &ServerFrame::err(request_id, reason)).await;
                }
            }
            Inbound::Malformed(reason) => {
                warn!(subscriber = %conn_id, reason = %reason, "Ignoring malformed subscriber frame");
            }
        }
    }

    async fn on_disconnect(&self, conn_id: &str, reason: CloseReason) {
        if self.registry.remove(conn_id).is_some() {
            info!(
                subscriber = %conn_id,
                code = ?reason.code,
                reason = %reason.reason,
                "Subscriber disconnected"
            );
        }
    }

    async fn on_error(&self, conn_id: &str, error: &str) {
        warn!(subscriber = %conn_id, error = %error, "Subscriber connection error");
    }
}
