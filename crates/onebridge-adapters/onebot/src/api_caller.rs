//! The outbound call seam.
//!
//! [`OneBotClient`](crate::OneBotClient) and the broadcast service hold an
//! `Arc<dyn ApiCaller>` and never see the transport. The production
//! implementation is [`CallCorrelator`](crate::CallCorrelator); tests
//! substitute stubs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use onebridge_core::ApiResult;

/// Issues gateway actions and returns their responses.
#[async_trait]
pub trait ApiCaller: Send + Sync {
    /// Calls `action` with an optional deadline override.
    ///
    /// Resolves with the full response object (`status`, `retcode`, `data`,
    /// ...). Errors are the call-level kinds of [`ApiError`](onebridge_core::ApiError).
    async fn call_with_timeout(
        &self,
        action: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> ApiResult<Value>;

    /// Calls `action` with the default deadline.
    async fn call(&self, action: &str, params: Value) -> ApiResult<Value> {
        self.call_with_timeout(action, params, None).await
    }
}
