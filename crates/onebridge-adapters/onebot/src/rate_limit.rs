//! Outbound call rate limiting.
//!
//! Two independent gates: a FIFO concurrency gate bounding calls in flight,
//! and a minimum spacing between consecutive dispatches. A call holds its
//! [`RatePermit`] until it completes in any way, so failures release their
//! slot as soon as they surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep_until};

use crate::config::RateLimitConfig;

/// Concurrency and spacing gate for outbound calls.
pub struct RateLimiter {
    slots: Option<Arc<Semaphore>>,
    max_concurrency: usize,
    min_interval: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

/// Proof of admission. Dropping it frees the concurrency slot.
#[derive(Debug)]
pub struct RatePermit {
    _slot: Option<OwnedSemaphorePermit>,
}

impl RateLimiter {
    /// Creates a limiter. `max_concurrency == 0` means unlimited.
    pub fn new(max_concurrency: usize, min_interval: Duration) -> Self {
        Self {
            slots: (max_concurrency > 0).then(|| Arc::new(Semaphore::new(max_concurrency))),
            max_concurrency,
            min_interval,
            last_dispatch: Mutex::new(None),
        }
    }

    /// A limiter that admits everything immediately.
    pub fn unlimited() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Builds a limiter from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.max_concurrency,
            Duration::from_millis(config.min_interval_ms),
        )
    }

    /// Waits for a concurrency slot, then for the dispatch spacing.
    ///
    /// Both waits are FIFO: tokio's semaphore and mutex queue waiters in
    /// arrival order.
    pub async fn acquire(&self) -> RatePermit {
        let permit = self.slot().await;
        self.pace().await;
        permit
    }

    /// Waits for a concurrency slot only.
    ///
    /// Callers that may block between admission and sending (for example
    /// while no connection is open) take the slot first and call
    /// [`pace`](Self::pace) right before the frame goes out.
    pub async fn slot(&self) -> RatePermit {
        let slot = match &self.slots {
            // The semaphore is never closed.
            Some(slots) => slots.clone().acquire_owned().await.ok(),
            None => None,
        };
        RatePermit { _slot: slot }
    }

    /// Waits until at least `min_interval` has passed since the previous
    /// dispatch, then records this one.
    pub async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_dispatch.lock().await;
        if let Some(previous) = *last {
            let earliest = previous + self.min_interval;
            if earliest > Instant::now() {
                sleep_until(earliest).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Free concurrency slots, or `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.slots.as_ref().map(|s| s.available_permits())
    }

    /// Configured concurrency bound (0 = unlimited).
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}
