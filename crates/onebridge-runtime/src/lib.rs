//! onebridge Runtime: configuration, logging and process orchestration.
//!
//! - [`config`]: layered settings (defaults, `onebridge.toml`, `ONEBRIDGE_*`
//!   environment) validated into an [`AppConfig`]
//! - [`logging`]: `tracing-subscriber` setup driven by [`LoggingConfig`]
//! - [`OneBridgeRuntime`]: starts the gateway adapter and, when enabled,
//!   the broadcast service, then waits for a shutdown signal
//!
//! ```ignore
//! use onebridge_runtime::OneBridgeRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = OneBridgeRuntime::builder().build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Transport capabilities are chosen by cargo features (`ws-client`,
//! `ws-server`, both on by default).

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{AppConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{OneBridgeRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for downstream crates.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
