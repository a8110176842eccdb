//! Client configuration.
//!
//! Configuration can be loaded from:
//! - a TOML file (`uplink.toml`, `/etc/uplink/uplink.toml`,
//!   `~/.config/uplink/uplink.toml`)
//! - the `UPLINK_ENDPOINT` environment variable for the endpoint
//! - plain struct construction
//!
//! The credential provider is injected programmatically (see
//! [`TokenProvider`](crate::token::TokenProvider)); it has no file
//! representation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration load errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// The config file could not be parsed.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL (ws://, wss://, http:// or https://).
    #[serde(default = "default_endpoint")]
    pub endpoint_url: String,

    /// Reconnect behavior.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Consumer delivery behavior.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Keepalive behavior.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// Reconnect configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Reconnect attempts after the first failure before the connection
    /// is considered lost for good.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds; doubles per attempt.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Upper bound on the backoff delay in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Time budget for a single connect attempt (dial + handshake) in
    /// milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Consumer delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Buffered updates per subscription. When a consumer falls this far
    /// behind, further updates for it are dropped.
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
}

/// Keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds, used when the server does not
    /// negotiate one.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// The connection is considered dead after this many silent
    /// heartbeat intervals.
    #[serde(default = "default_idle_intervals")]
    pub idle_intervals: u32,
}

// Default value functions
fn default_endpoint() -> String {
    std::env::var("UPLINK_ENDPOINT").unwrap_or_else(|_| "ws://127.0.0.1:8080/realtime".to_string())
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_backoff() -> u64 {
    250
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_subscription_buffer() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_idle_intervals() -> u32 {
    3
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint(),
            retry: RetryConfig::default(),
            delivery: DeliveryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            subscription_buffer: default_subscription_buffer(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            idle_intervals: default_idle_intervals(),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at a specific endpoint.
    #[must_use]
    pub fn with_endpoint(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the first config file found, falling back
    /// to defaults with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_paths = [
            "uplink.toml",
            "/etc/uplink/uplink.toml",
            "~/.config/uplink/uplink.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

impl RetryConfig {
    /// Base backoff delay.
    #[must_use]
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Maximum backoff delay.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Connect attempt time budget.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl HeartbeatConfig {
    /// Fallback ping interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_backoff_ms, 250);
        assert_eq!(config.delivery.subscription_buffer, 256);
        assert_eq!(config.heartbeat.idle_intervals, 3);
    }

    #[test]
    fn test_with_endpoint() {
        let config = ClientConfig::with_endpoint("wss://realtime.example.com/ws");
        assert_eq!(config.endpoint_url, "wss://realtime.example.com/ws");
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            endpoint_url = "wss://realtime.example.com/ws"

            [retry]
            max_retries = 8
            base_backoff_ms = 100

            [delivery]
            subscription_buffer = 64
        "#;

        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint_url, "wss://realtime.example.com/ws");
        assert_eq!(config.retry.max_retries, 8);
        assert_eq!(config.retry.base_backoff_ms, 100);
        assert_eq!(config.retry.max_backoff_ms, 30_000);
        assert_eq!(config.delivery.subscription_buffer, 64);
    }

    #[test]
    fn test_duration_helpers() {
        let retry = RetryConfig::default();
        assert_eq!(retry.base_backoff(), Duration::from_millis(250));
        assert_eq!(retry.connect_timeout(), Duration::from_secs(10));
    }
}
