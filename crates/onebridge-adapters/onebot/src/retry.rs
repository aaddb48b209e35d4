//! Opt-in retry policy for outbound calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use onebridge_core::ApiResult;

use crate::config::RetryConfig;

/// Exponential retry with symmetric jitter.
///
/// Only errors reporting [`is_retryable`](onebridge_core::ApiError::is_retryable)
/// are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    jitter: f64,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` counts the first attempt.
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_factor: f64, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_factor: backoff_factor.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Builds a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            config.backoff_factor,
            config.jitter,
        )
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        self.initial_delay
            .mul_f64(self.backoff_factor.powi(exponent))
    }

    /// Delay before retry number `retry` (1-based), with jitter applied.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter == 0.0 {
            return base;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        base.mul_f64((1.0 + spread).max(0.0))
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> ApiResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Retrying call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onebridge_core::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_base_delay_grows() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), 2.0, 0.0);
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000), 2.0, 0.25);
        for _ in 0..100 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_only_retryable_errors() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 2.0, 0.0);

        let calls = AtomicU32::new(0);
        let result: ApiResult<()> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::Timeout) }
            })
            .await;
        assert!(matches!(result, Err(ApiError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicU32::new(0);
        let result: ApiResult<()> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::ChannelClosed) }
            })
            .await;
        assert!(matches!(result, Err(ApiError::ChannelClosed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_connection_lost() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 2.0, 0.0);
        let result = policy
            .run(|attempt| async move {
                if attempt == 1 {
                    Err(ApiError::ConnectionLost)
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }
}
