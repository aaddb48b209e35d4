//! Outbound call correlation.
//!
//! Each call gets a fresh token, carried as the frame's `echo`. The pending
//! map holds one entry per outstanding token and every resolution path
//! removes it: the matching response, deadline expiry, failure of the
//! connection it was sent on, or the caller dropping the future.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use onebridge_core::{ApiError, ApiResult};

use crate::api_caller::ApiCaller;
use crate::link::GatewayLink;
use crate::model::{ApiRequest, ApiResponse};
use crate::rate_limit::RateLimiter;

/// An outstanding call.
struct PendingCall {
    action: String,
    conn_id: String,
    deadline: Instant,
    tx: oneshot::Sender<ApiResult<Value>>,
}

type PendingMap = Mutex<HashMap<String, PendingCall>>;

/// Removes the pending entry when the call future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    token: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.token);
    }
}

/// Matches outbound calls with inbound responses.
pub struct CallCorrelator {
    link: Arc<GatewayLink>,
    limiter: RateLimiter,
    pending: PendingMap,
    default_timeout: Duration,
    wait_for_open: bool,
}

impl CallCorrelator {
    /// Creates a correlator sending through `link`.
    pub fn new(
        link: Arc<GatewayLink>,
        limiter: RateLimiter,
        default_timeout: Duration,
        wait_for_open: bool,
    ) -> Self {
        Self {
            link,
            limiter,
            pending: Mutex::new(HashMap::new()),
            default_timeout,
            wait_for_open,
        }
    }

    /// Issues `action` and waits for its response.
    ///
    /// The deadline (override or default) covers queueing in the rate
    /// limiter, waiting for a connection when enabled, dispatch spacing and
    /// the round trip. Spacing is applied last, so calls that queued while
    /// the gateway was down still leave at least `min_interval` apart.
    pub async fn invoke(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> ApiResult<Value> {
        let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);

        let _permit = timeout_at(deadline, self.limiter.slot())
            .await
            .map_err(|_| {
                warn!(action = %action, "Call timed out waiting for a rate-limit slot");
                ApiError::Timeout
            })?;

        if !self.link.is_open() {
            if !self.wait_for_open {
                return Err(ApiError::ChannelClosed);
            }
            debug!(action = %action, "Waiting for gateway connection");
            timeout_at(deadline, self.link.wait_for_open())
                .await
                .map_err(|_| ApiError::Timeout)?;
        }

        let token = uuid::Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&ApiRequest {
            action,
            params: &params,
            echo: &token,
        })?;

        timeout_at(deadline, self.limiter.pace())
            .await
            .map_err(|_| ApiError::Timeout)?;

        let Some(connection) = self.link.current() else {
            return Err(ApiError::ChannelClosed);
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            token.clone(),
            PendingCall {
                action: action.to_string(),
                conn_id: connection.id.clone(),
                deadline,
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            token: token.clone(),
        };

        trace!(action = %action, echo = %token, conn_id = %connection.id, "Sending call");
        connection.send(frame).await.map_err(|e| {
            debug!(conn_id = %connection.id, error = %e, "Send on gateway connection failed");
            ApiError::ChannelClosed
        })?;

        match timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            // The sender is only dropped without a value when the entry is
            // cleared, which happens on connection loss.
            Ok(Err(_)) => Err(ApiError::ConnectionLost),
            Err(_) => {
                warn!(action = %action, echo = %token, "Call timed out");
                Err(ApiError::Timeout)
            }
        }
    }

    /// Routes a response to its waiting call.
    ///
    /// Returns false when no call is waiting for the token, e.g. because its
    /// deadline already fired; the response is discarded.
    pub fn resolve(&self, response: ApiResponse) -> bool {
        let entry = self.pending.lock().remove(&response.echo);
        match entry {
            Some(call) => {
                trace!(
                    action = %call.action,
                    echo = %response.echo,
                    remaining_ms = call.deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Resolving call"
                );
                let _ = call.tx.send(response.into_result());
                true
            }
            None => {
                debug!(echo = %response.echo, "Discarding response with no pending call");
                false
            }
        }
    }

    /// Rejects every pending call with [`ApiError::ConnectionLost`].
    ///
    /// Returns how many calls were rejected.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingCall> = self.pending.lock().drain().map(|(_, call)| call).collect();
        reject(drained)
    }

    /// Rejects the pending calls sent on `conn_id` with
    /// [`ApiError::ConnectionLost`]. Calls on other connections are kept.
    ///
    /// Returns how many calls were rejected.
    pub fn fail_conn(&self, conn_id: &str) -> usize {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            let tokens: Vec<String> = pending
                .iter()
                .filter(|(_, call)| call.conn_id == conn_id)
                .map(|(token, _)| token.clone())
                .collect();
            tokens
                .iter()
                .filter_map(|token| pending.remove(token))
                .collect()
        };
        reject(drained)
    }

    /// Number of outstanding calls.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// The link this correlator sends through.
    pub fn link(&self) -> &Arc<GatewayLink> {
        &self.link
    }
}

fn reject(calls: Vec<PendingCall>) -> usize {
    let count = calls.len();
    for call in calls {
        let _ = call.tx.send(Err(ApiError::ConnectionLost));
    }
    if count > 0 {
        warn!(count, "Rejected pending calls after connection loss");
    }
    count
}

#[async_trait]
impl ApiCaller for CallCorrelator {
    async fn call_with_timeout(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> ApiResult<Value> {
        self.invoke(action, params, timeout).await
    }
}
