//! Configuration validation utilities.

use onebridge_adapter_onebot::{ConnectionMode, GatewayConfig};
use onebridge_broadcast::BroadcastConfig;

use super::error::{ConfigError, ConfigResult};
use super::schema::{AppConfig, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &AppConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_gateway_config(&config.gateway)?;
    validate_broadcast_config(&config.broadcast)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_gateway_config(gateway: &GatewayConfig) -> ConfigResult<()> {
    match gateway.mode {
        ConnectionMode::Outbound => validate_url(&gateway.url)?,
        ConnectionMode::Inbound => {
            validate_port("gateway.listen.port", gateway.listen.port)?;
            validate_path("gateway.listen.path", &gateway.listen.path)?;
        }
    }

    if gateway.call_timeout_ms == 0 {
        return Err(ConfigError::validation("Call timeout must be greater than 0"));
    }

    let reconnect = &gateway.reconnect;
    if reconnect.min_ms == 0 {
        return Err(ConfigError::validation(
            "Minimum reconnect delay must be greater than 0",
        ));
    }
    if reconnect.max_ms < reconnect.min_ms {
        return Err(ConfigError::validation(
            "Maximum reconnect delay must be greater than or equal to the minimum",
        ));
    }
    if reconnect.factor < 1.0 {
        return Err(ConfigError::validation(
            "Reconnect backoff factor must be at least 1.0",
        ));
    }

    let retry = &gateway.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::validation("Retry max_attempts must be at least 1"));
    }
    if retry.backoff_factor < 1.0 {
        return Err(ConfigError::validation(
            "Retry backoff factor must be at least 1.0",
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(ConfigError::validation("Retry jitter must be within 0.0..=1.0"));
    }

    if gateway.dedup.enabled && gateway.dedup.ttl_ms == 0 {
        return Err(ConfigError::validation(
            "Dedup ttl must be greater than 0 when dedup is enabled",
        ));
    }

    Ok(())
}

fn validate_broadcast_config(broadcast: &BroadcastConfig) -> ConfigResult<()> {
    if !broadcast.enabled {
        return Ok(());
    }
    validate_port("broadcast.port", broadcast.port)?;
    validate_path("broadcast.path", &broadcast.path)?;
    if broadcast.lookup_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Broadcast lookup timeout must be greater than 0",
        ));
    }
    Ok(())
}

/// Validates a gateway URL.
fn validate_url(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("gateway.url"));
    }

    let valid_schemes = ["ws://", "wss://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }

    Ok(())
}

fn validate_port(field: &str, port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort {
            field: field.to_string(),
            port,
        });
    }
    Ok(())
}

fn validate_path(field: &str, path: &str) -> ConfigResult<()> {
    if !path.starts_with('/') {
        return Err(ConfigError::InvalidPath {
            field: field.to_string(),
            path: path.to_string(),
        });
    }
    Ok(())
}
