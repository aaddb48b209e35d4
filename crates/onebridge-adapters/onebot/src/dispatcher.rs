//! Inbound frame classification and event fan-out.
//!
//! [`EventDispatcher::on_frame`] runs inline on the connection's read loop.
//! Responses are resolved there directly; accepted events are queued to a
//! worker task that runs listeners. A listener may therefore await an
//! outbound call without blocking the response it is waiting for.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::{EventSummary, GatewayConfig};
use crate::correlator::CallCorrelator;
use crate::dedup::{Deduplicator, fingerprint};
use crate::filter::{MessageFilter, Rejection};
use crate::model::{EventKind, GatewayEvent, InboundFrame};

/// Receives dispatched events.
///
/// Implemented for any `Fn(Arc<GatewayEvent>) -> impl Future<Output =
/// anyhow::Result<()>>`, so closures can be registered directly.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Handles one event. Errors are logged and do not affect other
    /// listeners.
    async fn on_event(&self, event: Arc<GatewayEvent>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventListener for F
where
    F: Fn(Arc<GatewayEvent>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_event(&self, event: Arc<GatewayEvent>) -> anyhow::Result<()> {
        (self)(event).await
    }
}

/// Boxed event listener.
pub type BoxedEventListener = Arc<dyn EventListener>;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A response; `matched` tells whether a call was waiting for it.
    Response {
        /// Whether a pending call consumed the response.
        matched: bool,
    },
    /// An event queued for listeners.
    Queued(EventKind),
    /// A message event already seen within the dedup window.
    Duplicate,
    /// A message event that did not qualify.
    Filtered(Rejection),
    /// An unparsable frame.
    Malformed,
}

/// Routes frames to the correlator or to listeners.
pub struct EventDispatcher {
    correlator: Arc<CallCorrelator>,
    dedup: Option<Mutex<Deduplicator>>,
    filter: MessageFilter,
    summary: EventSummary,
    listeners: RwLock<HashMap<EventKind, Vec<BoxedEventListener>>>,
    queue: mpsc::UnboundedSender<Arc<GatewayEvent>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Arc<GatewayEvent>>>>,
}

impl EventDispatcher {
    /// Creates a dispatcher. Call [`start`](Self::start) to run listeners.
    pub fn new(config: &GatewayConfig, correlator: Arc<CallCorrelator>) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            correlator,
            dedup: config
                .dedup
                .enabled
                .then(|| Mutex::new(Deduplicator::from_config(&config.dedup))),
            filter: MessageFilter::new(&config.whitelist),
            summary: config.event_summary,
            listeners: RwLock::new(HashMap::new()),
            queue,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Registers a listener for one event category.
    ///
    /// Listeners of a category run in registration order.
    pub fn on(&self, kind: EventKind, listener: impl EventListener + 'static) {
        self.on_boxed(kind, Arc::new(listener));
    }

    /// Registers an already boxed listener.
    pub fn on_boxed(&self, kind: EventKind, listener: BoxedEventListener) {
        self.listeners.write().entry(kind).or_default().push(listener);
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Spawns the worker that delivers queued events to listeners.
    ///
    /// Returns `None` if the worker was already started.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut receiver = self.receiver.lock().take()?;
        let dispatcher = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                dispatcher.dispatch(event).await;
            }
            debug!("Event dispatch worker stopped");
        }))
    }

    /// Classifies one inbound frame.
    pub fn on_frame(&self, text: &str) -> FrameOutcome {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = text.len(), "Dropping malformed frame");
                trace!(frame = %text, "Malformed frame content");
                return FrameOutcome::Malformed;
            }
        };

        let event = match frame {
            InboundFrame::Response(response) => {
                return FrameOutcome::Response {
                    matched: self.correlator.resolve(response),
                };
            }
            InboundFrame::Event(event) => event,
        };

        if let GatewayEvent::Message(message) = &event {
            if let Some(dedup) = &self.dedup
                && dedup.lock().check_and_insert(&fingerprint(message))
            {
                debug!(message_id = message.message_id, "Suppressing duplicate message event");
                return FrameOutcome::Duplicate;
            }
            if let Err(rejection) = self.filter.check(message) {
                debug!(message_id = message.message_id, reason = ?rejection, "Message event filtered");
                return FrameOutcome::Filtered(rejection);
            }
        }

        self.log_event(&event);
        let kind = event.kind();
        if self.queue.send(Arc::new(event)).is_err() {
            warn!("Event dispatch worker is gone, dropping event");
        }
        FrameOutcome::Queued(kind)
    }

    /// Runs every listener for the event's category, in order.
    pub async fn dispatch(&self, event: Arc<GatewayEvent>) {
        let kind = event.kind();
        let listeners = self.listeners.read().get(&kind).cloned().unwrap_or_default();

        for (index, listener) in listeners.iter().enumerate() {
            match AssertUnwindSafe(listener.on_event(Arc::clone(&event)))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(kind = kind.as_str(), listener = index, error = %e, "Event listener failed");
                }
                Err(_) => {
                    error!(kind = kind.as_str(), listener = index, "Event listener panicked");
                }
            }
        }
    }

    fn log_event(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Meta(meta) if meta.is_heartbeat() => {
                trace!(self_id = meta.self_id, "Heartbeat");
                return;
            }
            GatewayEvent::Meta(meta) => {
                debug!(self_id = meta.self_id, sub_type = ?meta.sub_type, "Lifecycle event");
                return;
            }
            _ => {}
        }

        match (self.summary, event) {
            (EventSummary::Off, _) => {}
            (EventSummary::Brief, GatewayEvent::Message(m)) => info!(
                message_id = m.message_id,
                conversation = %m.conversation_key(),
                user_id = m.user_id,
                "Message event"
            ),
            (EventSummary::Full, GatewayEvent::Message(m)) => info!(
                message_id = m.message_id,
                conversation = %m.conversation_key(),
                user_id = m.user_id,
                text = %m.plain_text(),
                "Message event"
            ),
            (_, GatewayEvent::Notice(n)) => {
                info!(notice_type = %n.notice_type, group_id = ?n.group_id, "Notice event")
            }
            (_, GatewayEvent::Request(r)) => {
                info!(request_type = %r.request_type, user_id = r.user_id, "Request event")
            }
            (_, GatewayEvent::Meta(_)) => {}
        }
    }
}
