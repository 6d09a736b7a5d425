//! Runtime server configuration.

use std::time::Duration;

use relay_settings::ServerSettings;
use tracing::warn;

/// Configuration for the relay server.
///
/// Built from [`ServerSettings`]; zero-valued intervals become `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum registered connections.
    pub max_connections: usize,
    /// Broadcast channel capacity (always at least 1).
    pub channel_capacity: usize,
    /// Dispatcher ping period, if pings are enabled.
    pub heartbeat_interval: Option<Duration>,
    /// Per-connection read deadline, if enabled.
    pub idle_timeout: Option<Duration>,
    /// Per-write deadline for the dispatcher, if enabled.
    pub write_timeout: Option<Duration>,
    /// Max `WebSocket` message size in bytes.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// Build the runtime view of loaded settings.
    ///
    /// Warns when the idle deadline is not covered by pings, since passive
    /// clients would then be retired after `idle_timeout`.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        let config = Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            channel_capacity: settings.channel_capacity.max(1),
            heartbeat_interval: non_zero_secs(settings.heartbeat_interval_secs),
            idle_timeout: non_zero_secs(settings.idle_timeout_secs),
            write_timeout: non_zero_secs(settings.write_timeout_secs),
            max_message_size: settings.max_message_size,
        };
        if config.idle_timeout.is_some() && !config.heartbeat_covers_idle_timeout() {
            warn!(
                heartbeat_interval_secs = settings.heartbeat_interval_secs,
                idle_timeout_secs = settings.idle_timeout_secs,
                "heartbeat does not fire within the idle timeout; clients that never send will be disconnected"
            );
        }
        config
    }

    /// Whether a ping is sent before any connection can hit its idle deadline.
    pub fn heartbeat_covers_idle_timeout(&self) -> bool {
        match (self.heartbeat_interval, self.idle_timeout) {
            (_, None) => true,
            (Some(heartbeat), Some(idle)) => heartbeat < idle,
            (None, Some(_)) => false,
        }
    }

    /// `host:port` as requested (before any port auto-assignment).
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    /// Loopback on an auto-assigned port; every other value as in
    /// [`ServerSettings::default`].
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from_settings(&ServerSettings::default())
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
