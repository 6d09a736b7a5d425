//! Settings types with their compiled defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Listener and connection-handling settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Listener and connection-handling settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Maximum simultaneously registered connections.
    pub max_connections: usize,
    /// Capacity of the broadcast channel; producers wait when it is full.
    pub channel_capacity: usize,
    /// Seconds between dispatcher ping sweeps (`0` disables pings).
    pub heartbeat_interval_secs: u64,
    /// Seconds of read silence before a connection is retired (`0` disables).
    pub idle_timeout_secs: u64,
    /// Seconds a single outbound write may take before the connection is
    /// retired (`0` disables).
    pub write_timeout_secs: u64,
    /// Largest accepted WebSocket frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 80,
            max_connections: 1024,
            channel_capacity: 1024,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 90,
            write_timeout_secs: 10,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log line format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Lowercase name as used in settings files and env vars.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(SettingsError::InvalidValue(format!("log format `{other}`"))),
        }
    }
}
