//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: enables TOML files (`onebridge.toml`, `config.toml`)
//! - `yaml-config`: enables YAML files (`onebridge.yaml`, `onebridge.yml`, ...)
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific file next to the main file (`onebridge.{profile}.toml`)
//! 3. Main file (`onebridge.toml` / `config.toml`)
//! 4. Environment variables (`ONEBRIDGE_*`)
//! 5. Programmatic overrides
//!
//! # Environment Variable Mapping
//!
//! `ONEBRIDGE_` prefix with `__` as the nesting separator:
//!
//! - `ONEBRIDGE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `ONEBRIDGE_GATEWAY__ACCESS_TOKEN=xxx` → `gateway.access_token = "xxx"`
//! - `ONEBRIDGE_BROADCAST__ENABLED=true` → `broadcast.enabled = true`
//!
//! # Example
//!
//! ```rust,ignore
//! use onebridge_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/onebridge.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::providers::{Env, Serialized};
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::{Figment, Provider};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::AppConfig;
use super::validation::validate_config;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ONEBRIDGE_";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Maps a name to a profile; `prod` and `dev` are accepted aliases.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `ONEBRIDGE_PROFILE`, defaulting to Development.
    pub fn from_env() -> Self {
        std::env::var(format!("{ENV_PREFIX}PROFILE"))
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    /// Programmatic overrides, merged last.
    overrides: Figment,
    /// Configuration profile.
    profile: Profile,
    /// Search paths for configuration files.
    search_paths: Vec<PathBuf>,
    /// Whether to load environment variables.
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a whole configuration over every other source.
    pub fn merge(self, config: AppConfig) -> Self {
        self.provider(Serialized::defaults(config))
    }

    /// Merges an arbitrary figment provider over every other source.
    ///
    /// ```rust,ignore
    /// let config = ConfigLoader::new()
    ///     .provider(Serialized::default("logging.level", "debug"))
    ///     .load()?;
    /// ```
    pub fn provider(mut self, provider: impl Provider) -> Self {
        self.overrides = self.overrides.merge(provider);
        self
    }

    /// Loads and validates the configuration.
    pub fn load(self) -> ConfigResult<AppConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: AppConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            mode = ?config.gateway.mode,
            broadcast = config.broadcast.enabled,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Builds the figment instance with all sources.
    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        let file = match self.config_file.take() {
            Some(path) if path.exists() => Some(path),
            Some(path) => return Err(ConfigError::FileNotFound(path)),
            None => self.find_config_file(),
        };
        match file {
            Some(path) => {
                figment = self.merge_profile_sibling(figment, &path)?;
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_config_file(figment, &path)?;
            }
            None => warn!(paths = ?self.search_dirs(), "No configuration file found, using defaults"),
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        let overrides = std::mem::take(&mut self.overrides);
        Ok(figment.merge(overrides))
    }

    /// Merges `name.{profile}.ext` next to the main file, if present.
    fn merge_profile_sibling(&self, figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) else {
            return Ok(figment);
        };
        let sibling = path.with_file_name(format!("{stem}.{}.{ext}", self.profile));
        if !sibling.exists() {
            return Ok(figment);
        }
        debug!(path = %sibling.display(), "Loading profile-specific config");
        merge_config_file(figment, &sibling)
    }

    /// Directories searched for a config file, in order.
    ///
    /// Defaults to the working directory, then `<user config dir>/onebridge`.
    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("onebridge")))
            .collect()
    }

    /// The first known config file name present in a search directory.
    fn find_config_file(&self) -> Option<PathBuf> {
        self.search_dirs().into_iter().find_map(|dir| {
            FILE_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|path| path.exists())
        })
    }
}

/// Config file names tried in each search directory, most preferred first.
const FILE_NAMES: &[&str] = &[
    #[cfg(feature = "toml-config")]
    "onebridge.toml",
    #[cfg(feature = "toml-config")]
    "config.toml",
    #[cfg(feature = "yaml-config")]
    "onebridge.yaml",
    #[cfg(feature = "yaml-config")]
    "onebridge.yml",
    #[cfg(feature = "yaml-config")]
    "config.yaml",
    #[cfg(feature = "yaml-config")]
    "config.yml",
];

/// Merges one config file, dispatching on its extension.
///
/// Only extensions enabled via feature flags are accepted.
fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

/// Loads the configuration from the default locations.
pub fn load_config() -> ConfigResult<AppConfig> {
    ConfigLoader::new().load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use onebridge_adapter_onebot::ConnectionMode;

    fn empty_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "onebridge-config-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config() {
        let config = ConfigLoader::new()
            .without_env()
            .search_path(empty_dir())
            .load()
            .unwrap();

        assert_eq!(config.logging.level.as_str(), "info");
        assert_eq!(config.gateway.mode, ConnectionMode::Outbound);
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging"), Profile::Custom("staging".into()));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = ConfigLoader::new()
            .without_env()
            .file(empty_dir().join("absent.toml"))
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = empty_dir();
        let path = dir.join("onebridge.ini");
        std::fs::write(&path, "level = debug").unwrap();
        let result = ConfigLoader::new().without_env().file(&path).load();
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedFormat { extension }) if extension == "ini"
        ));
    }

    #[test]
    fn test_programmatic_overrides_win() {
        let config = ConfigLoader::new()
            .without_env()
            .search_path(empty_dir())
            .provider(Serialized::default("gateway.call_timeout_ms", 1234))
            .provider(Serialized::default("logging.level", "trace"))
            .load()
            .unwrap();
        assert_eq!(config.gateway.call_timeout_ms, 1234);
        assert_eq!(config.logging.level, LogLevel::Trace);
    }

    #[test]
    fn test_merged_config_replaces_file_values() {
        let mut merged = AppConfig::default();
        merged.broadcast.enabled = true;
        merged.broadcast.port = 7100;
        let config = ConfigLoader::new()
            .without_env()
            .search_path(empty_dir())
            .merge(merged)
            .load()
            .unwrap();
        assert!(config.broadcast.enabled);
        assert_eq!(config.broadcast.port, 7100);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let result = ConfigLoader::new()
            .without_env()
            .search_path(empty_dir())
            .provider(Serialized::default("gateway.url", "http://nope"))
            .load();
        assert!(matches!(result, Err(ConfigError::InvalidUrl { .. })));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_toml_string_source() {
        let config = ConfigLoader::new()
            .without_env()
            .search_path(empty_dir())
            .provider(Toml::string(
                r#"
                [gateway]
                mode = "inbound"
                whitelist = { groups = [1, 2] }

                [gateway.listen]
                port = 7001

                [broadcast]
                enabled = true
                include_raw_event = true
                "#,
            ))
            .load()
            .unwrap();
        assert_eq!(config.gateway.mode, ConnectionMode::Inbound);
        assert_eq!(config.gateway.listen.port, 7001);
        assert_eq!(config.gateway.whitelist.groups, vec![1, 2]);
        assert!(config.broadcast.include_raw_event);
        assert_eq!(config.broadcast.port, 6702);
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_main_file_overrides_profile_file() {
        let dir = empty_dir();
        std::fs::write(
            dir.join("onebridge.staging.toml"),
            "[gateway]\ncall_timeout_ms = 1000\nurl = \"ws://profile:1\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("onebridge.toml"),
            "[gateway]\ncall_timeout_ms = 2000\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .without_env()
            .profile("staging")
            .search_path(&dir)
            .load()
            .unwrap();
        assert_eq!(config.gateway.call_timeout_ms, 2000);
        assert_eq!(config.gateway.url, "ws://profile:1");
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_first_search_dir_with_a_file_wins() {
        let (empty, first, second) = (empty_dir(), empty_dir(), empty_dir());
        std::fs::write(first.join("config.toml"), "[gateway]
call_timeout_ms = 3000
").unwrap();
        std::fs::write(second.join("onebridge.toml"), "[gateway]
call_timeout_ms = 4000
")
            .unwrap();

        let config = ConfigLoader::new()
            .without_env()
            .search_path(&empty)
            .search_path(&first)
            .search_path(&second)
            .load()
            .unwrap();
        assert_eq!(config.gateway.call_timeout_ms, 3000);
    }
}
