//! Process orchestration.
//!
//! [`OneBridgeRuntime`] wires the configured pieces together: the gateway
//! adapter, and when enabled the broadcast service listening on the
//! adapter's message events.
//!
//! ```rust,ignore
//! use onebridge_runtime::OneBridgeRuntime;
//!
//! let runtime = OneBridgeRuntime::builder()
//!     .config_file("onebridge.toml")
//!     .profile("production")
//!     .build()?;
//! runtime.run().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use figment::providers::Serialized;
use tokio::signal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use onebridge_adapter_onebot::{EventKind, OneBotAdapter};
use onebridge_broadcast::BroadcastService;
use onebridge_core::TransportContext;

use crate::config::{AppConfig, ConfigLoader, ConfigResult, LogLevel};
use crate::error::RuntimeResult;
use crate::logging;

/// Components alive between `start` and `stop`.
struct Started {
    adapter: Arc<OneBotAdapter>,
    broadcast: Option<(Arc<BroadcastService>, SocketAddr)>,
}

/// The onebridge process: one gateway adapter plus an optional broadcast
/// service.
pub struct OneBridgeRuntime {
    config: AppConfig,
    transport: TransportContext,
    started: RwLock<Option<Started>>,
}

impl OneBridgeRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from a loaded configuration and initializes logging.
    pub fn from_config(config: &AppConfig) -> Self {
        logging::init_from_config(&config.logging);
        Self::with_transport(config, onebridge_transport::default_context())
    }

    /// Creates a runtime using a specific transport context.
    ///
    /// Logging is left untouched.
    pub fn with_transport(config: &AppConfig, transport: TransportContext) -> Self {
        info!(
            log_level = %config.logging.level,
            mode = ?config.gateway.mode,
            broadcast = config.broadcast.enabled,
            "Runtime initialized from configuration"
        );
        Self {
            config: config.clone(),
            transport,
            started: RwLock::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Whether the runtime has been started and not yet stopped.
    pub async fn is_running(&self) -> bool {
        self.started.read().await.is_some()
    }

    /// The gateway adapter, while running.
    pub async fn adapter(&self) -> Option<Arc<OneBotAdapter>> {
        self.started
            .read()
            .await
            .as_ref()
            .map(|s| Arc::clone(&s.adapter))
    }

    /// The broadcast service, while running and enabled.
    pub async fn broadcast(&self) -> Option<Arc<BroadcastService>> {
        self.started
            .read()
            .await
            .as_ref()
            .and_then(|s| s.broadcast.as_ref().map(|(svc, _)| Arc::clone(svc)))
    }

    /// Address the broadcast endpoint is bound to, while running.
    pub async fn broadcast_addr(&self) -> Option<SocketAddr> {
        self.started
            .read()
            .await
            .as_ref()
            .and_then(|s| s.broadcast.as_ref().map(|(_, addr)| *addr))
    }

    /// Starts the broadcast endpoint (if enabled), then the gateway
    /// connection.
    ///
    /// Starting twice is a no-op.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut started = self.started.write().await;
        if started.is_some() {
            warn!("Runtime is already running");
            return Ok(());
        }

        info!("Starting onebridge runtime");
        let adapter = OneBotAdapter::new(self.config.gateway.clone());

        let broadcast = if self.config.broadcast.enabled {
            let service = BroadcastService::new(self.config.broadcast.clone(), adapter.caller());
            let addr = match service.start(&self.transport).await {
                Ok(addr) => addr,
                Err(e) => {
                    adapter.close();
                    return Err(e.into());
                }
            };
            adapter
                .dispatcher()
                .on_boxed(EventKind::Message, Arc::clone(&service) as _);
            Some((service, addr))
        } else {
            None
        };

        if let Err(e) = adapter.start(&self.transport).await {
            if let Some((service, _)) = &broadcast {
                service.shutdown();
            }
            adapter.close();
            return Err(e.into());
        }

        *started = Some(Started { adapter, broadcast });
        info!("Runtime started");
        Ok(())
    }

    /// Stops the broadcast service, then the gateway adapter.
    pub async fn stop(&self) -> RuntimeResult<()> {
        let Some(started) = self.started.write().await.take() else {
            warn!("Runtime is not running");
            return Ok(());
        };

        info!("Stopping onebridge runtime");
        if let Some((service, _)) = &started.broadcast {
            service.shutdown();
        }
        started.adapter.close();
        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("onebridge is running. Press Ctrl+C to stop.");

        let waited = wait_for_shutdown().await;
        self.stop().await?;
        waited
    }

    /// Runs until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder loading configuration before creating a [`OneBridgeRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a builder searching the default locations.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    /// Loads this file instead of searching.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables environment overrides.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a figment provider over every other source.
    pub fn provider(mut self, provider: impl figment::Provider) -> Self {
        self.config_loader = self.config_loader.provider(provider);
        self
    }

    /// Overrides the configured log level.
    pub fn log_level(self, level: LogLevel) -> Self {
        self.provider(Serialized::default("logging.level", level.as_str()))
    }

    /// Loads and validates the configuration without building a runtime.
    pub fn load(self) -> ConfigResult<AppConfig> {
        self.config_loader.load()
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> ConfigResult<OneBridgeRuntime> {
        let config = self.load()?;
        Ok(OneBridgeRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
