//! Configuration management for the loopback tool and embedders.
//!
//! Configuration is stored as TOML. The default path is
//! `~/.config/rtc-bridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::configuration::{Configuration, IceServer, DEFAULT_STUN_SERVERS};
use crate::reliability::Reliability;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("channel label must not be empty")]
    EmptyLabel,

    #[error("max_packet_life_time_ms and max_retransmits cannot both be set")]
    ConflictingReliability,

    #[error("socket url must start with ws:// or wss://, got {0}")]
    InvalidSocketUrl(String),
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub connection: ConnectionConfig,
    pub channel: ChannelConfig,
    pub socket: SocketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

/// Peer connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub ice_servers: Vec<IceServer>,
}

/// Settings for locally created data channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub label: String,

    /// Allow out-of-order delivery.
    pub unordered: bool,

    /// Give up on a message after this many milliseconds.
    pub max_packet_life_time_ms: Option<u64>,

    /// Give up on a message after this many retransmissions.
    pub max_retransmits: Option<u32>,

    /// Bytes below which buffered-amount-low fires.
    pub buffered_amount_low_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SocketConfig {
    /// Endpoint used by the `echo` command.
    pub url: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|&url| IceServer::url(url))
                .collect(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            label: "chat".to_string(),
            unordered: false,
            max_packet_life_time_ms: None,
            max_retransmits: None,
            buffered_amount_low_threshold: 0,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/echo".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rtc-bridge")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides.
    ///
    /// Supported variables:
    /// - RTC_LOG_LEVEL: log level
    /// - RTC_ICE_SERVERS: comma-separated ICE server URLs, replacing the list
    /// - RTC_SOCKET_URL: web socket endpoint
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = non_empty_var("RTC_LOG_LEVEL") {
            tracing::info!(%level, "Overriding log level from environment");
            self.logging.level = level;
        }

        if let Some(servers) = non_empty_var("RTC_ICE_SERVERS") {
            let servers: Vec<IceServer> = servers
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(IceServer::url)
                .collect();
            tracing::info!(count = servers.len(), "Overriding ICE servers from environment");
            self.connection.ice_servers = servers;
        }

        if let Some(url) = non_empty_var("RTC_SOCKET_URL") {
            tracing::info!(%url, "Overriding socket url from environment");
            self.socket.url = url;
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        if self.channel.label.is_empty() {
            return Err(ConfigError::EmptyLabel);
        }

        self.reliability()?;

        let url = &self.socket.url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(ConfigError::InvalidSocketUrl(url.clone()));
        }

        Ok(())
    }

    /// The reliability of channels created from the `[channel]` section.
    pub fn reliability(&self) -> Result<Reliability, ConfigError> {
        Reliability::new(
            self.channel.unordered,
            self.channel.max_packet_life_time_ms.map(Duration::from_millis),
            self.channel.max_retransmits,
        )
        .map_err(|_| ConfigError::ConflictingReliability)
    }

    /// The peer connection configuration from the `[connection]` section.
    pub fn configuration(&self) -> Configuration {
        Configuration {
            ice_servers: self.connection.ice_servers.clone(),
        }
    }

    /// Load configuration from a file.
    ///
    /// A missing file yields the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from [`default_config_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
