//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Topic carrying the live sensor snapshot
pub const LIVE_TOPIC: &str = "/topic/live_now";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Live channel configuration. Fixed once a channel is created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    /// Broker WebSocket URL; falls back to `wss://api.hydroleaf.se/ws`
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Origin of the hosting page. An `https:` origin forces `wss://`.
    #[serde(default)]
    pub origin: Option<String>,

    /// Destination to subscribe to; shorthand names get a `/topic/` prefix
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Desired interval of broker heart-beats (0 disables)
    #[serde(default = "default_heartbeat")]
    pub heartbeat_incoming_ms: u64,

    /// Interval at which we offer to send heart-beats (0 disables)
    #[serde(default = "default_heartbeat")]
    pub heartbeat_outgoing_ms: u64,

    /// How long to wait for the broker's CONNECTED frame (0 waits forever)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_topic() -> String {
    LIVE_TOPIC.to_string()
}

fn default_reconnect_delay() -> u64 {
    5000 // 5 seconds
}

fn default_heartbeat() -> u64 {
    10000
}

fn default_connect_timeout() -> u64 {
    10000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            origin: None,
            topic: default_topic(),
            reconnect_delay_ms: default_reconnect_delay(),
            heartbeat_incoming_ms: default_heartbeat(),
            heartbeat_outgoing_ms: default_heartbeat(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl ChannelConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        Self::load_first(&Self::default_paths())
    }

    /// Locations searched by [`load_default`](Self::load_default), in order
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = dirs::config_dir()
            .map(|p| p.join("hydroleaf").join("config.toml"))
            .into_iter()
            .collect();
        paths.push(PathBuf::from("/etc/hydroleaf/config.toml"));
        paths.push(PathBuf::from("./config.toml"));
        paths
    }

    /// Load the first existing file that parses, else defaults plus environment
    pub fn load_first(paths: &[PathBuf]) -> Self {
        for path in paths {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // VITE_WS_URL is what the dashboard's .env files use
        if let Some(url) = lookup("HYDROLEAF_WS_URL").or_else(|| lookup("VITE_WS_URL")) {
            self.channel.endpoint_url = Some(url);
        }
        if let Some(origin) = lookup("HYDROLEAF_ORIGIN") {
            self.channel.origin = Some(origin);
        }
        if let Some(delay) = lookup("HYDROLEAF_RECONNECT_DELAY_MS") {
            match delay.parse() {
                Ok(ms) => self.channel.reconnect_delay_ms = ms,
                Err(_) => tracing::warn!(value = %delay, "Ignoring invalid HYDROLEAF_RECONNECT_DELAY_MS"),
            }
        }

        if let Some(level) = lookup("HYDROLEAF_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("HYDROLEAF_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Hydroleaf Live Configuration
#
# Environment variables override these settings:
# - HYDROLEAF_WS_URL (or VITE_WS_URL)
# - HYDROLEAF_ORIGIN
# - HYDROLEAF_RECONNECT_DELAY_MS
# - HYDROLEAF_LOG_LEVEL
# - HYDROLEAF_LOG_FORMAT

[channel]
# Broker WebSocket endpoint (default: wss://api.hydroleaf.se/ws)
# endpoint_url = "ws://localhost:8080/ws"

# Origin of the hosting page; an https origin upgrades ws:// to wss://
# origin = "https://app.hydroleaf.se"

# Topic to subscribe to
topic = "/topic/live_now"

# Fixed delay between reconnection attempts (ms)
reconnect_delay_ms = 5000

# STOMP heart-beats (ms, 0 disables)
heartbeat_incoming_ms = 10000
heartbeat_outgoing_ms = 10000

# Wait for the broker's CONNECTED frame (ms, 0 waits forever)
connect_timeout_ms = 10000

[logging]
# Log level (trace, debug, info, warn, error)
level = "info"

# Log format (pretty, json)
format = "pretty"
"#
    .to_string()
}
