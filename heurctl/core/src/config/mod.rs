//! TOML Configuration File Support
//!
//! Centralized configuration loading for the client, from a TOML file at
//! `~/.config/heurctl/heurctl.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - Config: `$XDG_CONFIG_HOME/heurctl/heurctl.toml`
//! - Cache:  `$XDG_DATA_HOME/heurctl/cache`
//!
//! # Example Configuration
//!
//! ```toml
//! [transport]
//! url = "ws://optimizer.lab:8000/ws"
//! max_retries = 5
//! initial_delay_ms = 1000
//! connect_timeout_ms = 5000
//!
//! [cache]
//! dir = "/var/tmp/heurctl"
//!
//! [notifications]
//! ttl_ms = 5000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notify::NOTICE_TTL;
use crate::transport::TransportConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Job server endpoint
    pub url: Option<String>,

    /// Reconnection attempts after an unclean close
    pub max_retries: Option<u32>,

    /// First reconnect delay in milliseconds
    pub initial_delay_ms: Option<u64>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Directory for persisted configuration
    pub dir: Option<PathBuf>,
}

/// Notifications section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsToml {
    /// How long a notice stays visible, in milliseconds
    pub ttl_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeurctlToml {
    /// Transport configuration section
    pub transport: TransportToml,

    /// Cache configuration section
    pub cache: CacheToml,

    /// Notifications configuration section
    pub notifications: NotificationsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved client configuration
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct ClientConfigFile {
    /// Transport configuration
    pub transport: TransportConfig,

    /// Directory for the persisted configuration cache
    pub cache_dir: PathBuf,

    /// Notice lifetime
    pub notice_ttl: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfigFile {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            cache_dir: default_cache_dir(),
            notice_ttl: NOTICE_TTL,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfigFile {
    /// Highest-priority layer that set any value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make the client misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.transport.has_websocket_scheme() {
            return Err(ConfigError::ValidationError(format!(
                "transport.url must start with ws:// or wss://, got `{}`",
                self.transport.url
            )));
        }
        if self.transport.initial_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "transport.initial_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.notice_ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "notifications.ttl_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/heurctl/heurctl.toml` or
/// `~/.config/heurctl/heurctl.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("heurctl").join("heurctl.toml"))
}

/// Get the default cache directory
///
/// `$XDG_DATA_HOME/heurctl/cache`, falling back to a relative
/// `.heurctl/cache` when no data directory is known.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from(".heurctl").join("cache"),
        |p| p.join("heurctl").join("cache"),
    )
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<ClientConfigFile, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfigFile, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfigFile, ConfigError> {
    let mut config = ClientConfigFile::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: HeurctlToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;
    Ok(config)
}

/// Copy every value present in the file over the defaults
fn apply_toml_config(config: &mut ClientConfigFile, toml: &HeurctlToml) {
    if let Some(ref url) = toml.transport.url {
        config.transport.url = url.clone();
    }
    if let Some(retries) = toml.transport.max_retries {
        config.transport.max_retries = retries;
    }
    if let Some(delay) = toml.transport.initial_delay_ms {
        config.transport.initial_delay_ms = delay;
    }
    if let Some(timeout) = toml.transport.connect_timeout_ms {
        config.transport.connect_timeout_ms = timeout;
    }
    if let Some(ref dir) = toml.cache.dir {
        config.cache_dir = dir.clone();
    }
    if let Some(ttl) = toml.notifications.ttl_ms {
        config.notice_ttl = Duration::from_millis(ttl);
    }
}

/// Apply `HEURCTL_*` environment overrides; unparsable numbers are ignored
fn apply_env_config(config: &mut ClientConfigFile, env: impl Fn(&str) -> Option<String>) {
    let number = |key: &str| env(key).and_then(|v| v.trim().parse::<u64>().ok());
    let mut touched = false;

    if let Some(url) = env("HEURCTL_URL") {
        config.transport.url = url;
        touched = true;
    }
    if let Some(n) = env("HEURCTL_MAX_RETRIES").and_then(|v| v.trim().parse::<u32>().ok()) {
        config.transport.max_retries = n;
        touched = true;
    }
    if let Some(ms) = number("HEURCTL_INITIAL_DELAY_MS") {
        config.transport.initial_delay_ms = ms;
        touched = true;
    }
    if let Some(ms) = number("HEURCTL_CONNECT_TIMEOUT") {
        config.transport.connect_timeout_ms = ms;
        touched = true;
    }
    if let Some(dir) = env("HEURCTL_CACHE_DIR") {
        config.cache_dir = PathBuf::from(dir);
        touched = true;
    }
    if let Some(ms) = number("HEURCTL_NOTICE_TTL_MS") {
        config.notice_ttl = Duration::from_millis(ms);
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides,
/// then call [`ClientConfigFile::validate`] again.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Endpoint override
    pub url: Option<String>,

    /// Retry budget override
    pub max_retries: Option<u32>,

    /// Initial reconnect delay override (milliseconds)
    pub initial_delay_ms: Option<u64>,

    /// Cache directory override
    pub cache_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }

    /// Set retry budget override
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set initial delay override
    #[must_use]
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = Some(ms);
        self
    }

    /// Set cache directory override
    #[must_use]
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfigFile) {
        if self.url.is_some()
            || self.max_retries.is_some()
            || self.initial_delay_ms.is_some()
            || self.cache_dir.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.url {
            config.transport.url = url.clone();
        }
        if let Some(retries) = self.max_retries {
            config.transport.max_retries = retries;
        }
        if let Some(ms) = self.initial_delay_ms {
            config.transport.initial_delay_ms = ms;
        }
        if let Some(ref dir) = self.cache_dir {
            config.cache_dir = dir.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
