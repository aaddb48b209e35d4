//! Live subscriber set.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use onebridge_core::ConnectionHandle;

/// Lifecycle of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Upgrade accepted, no handle yet.
    Connecting,
    /// Handle available, welcome not yet delivered.
    Open,
    /// Receiving published events.
    Active,
    /// Gone; kept only as the result of [`SubscriberRegistry::remove`].
    Closed,
}

struct Subscriber {
    state: SubscriberState,
    remote_addr: Option<String>,
    handle: Option<ConnectionHandle>,
}

/// Tracks subscribers by connection ID.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection in [`SubscriberState::Connecting`].
    pub fn connecting(&self, id: &str, remote_addr: Option<String>) {
        self.subscribers.write().insert(
            id.to_string(),
            Subscriber {
                state: SubscriberState::Connecting,
                remote_addr,
                handle: None,
            },
        );
    }

    /// Attaches the connection handle, moving to [`SubscriberState::Open`].
    ///
    /// Returns false if the subscriber is unknown.
    pub fn open(&self, id: &str, handle: ConnectionHandle) -> bool {
        match self.subscribers.write().get_mut(id) {
            Some(sub) => {
                sub.state = SubscriberState::Open;
                sub.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Moves an open subscriber to [`SubscriberState::Active`].
    pub fn activate(&self, id: &str) {
        if let Some(sub) = self.subscribers.write().get_mut(id) {
            if sub.state == SubscriberState::Open {
                sub.state = SubscriberState::Active;
            }
        }
    }

    /// Removes a subscriber, returning its handle if it had one.
    pub fn remove(&self, id: &str) -> Option<ConnectionHandle> {
        let mut sub = self.subscribers.write().remove(id)?;
        sub.state = SubscriberState::Closed;
        debug!(
            subscriber = %id,
            state = ?sub.state,
            remote_addr = ?sub.remote_addr,
            "Subscriber removed"
        );
        sub.handle
    }

    /// Current state of a subscriber.
    pub fn state(&self, id: &str) -> Option<SubscriberState> {
        self.subscribers.read().get(id).map(|s| s.state)
    }

    /// The handle of a subscriber that has one.
    pub fn handle(&self, id: &str) -> Option<ConnectionHandle> {
        self.subscribers.read().get(id).and_then(|s| s.handle.clone())
    }

    /// Handles of every active subscriber.
    pub fn active(&self) -> Vec<ConnectionHandle> {
        self.subscribers
            .read()
            .values()
            .filter(|s| s.state == SubscriberState::Active)
            .filter_map(|s| s.handle.clone())
            .collect()
    }

    /// Number of active subscribers.
    pub fn active_count(&self) -> usize {
        self.subscribers
            .read()
            .values()
            .filter(|s| s.state == SubscriberState::Active)
            .count()
    }

    /// Number of tracked subscribers in any state.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether no subscribers are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every subscriber, returning the handles.
    pub fn drain(&self) -> Vec<ConnectionHandle> {
        self.subscribers
            .write()
            .drain()
            .filter_map(|(_, s)| s.handle)
            .collect()
    }
}
