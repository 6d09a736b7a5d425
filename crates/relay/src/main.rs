//! # relay
//!
//! Relay server binary: loads settings, initializes logging and metrics, and
//! serves the `WebSocket` relay until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::UuidV7IdProvider;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{LogFormat, RelaySettings};
use tracing::{info, warn};

/// Real-time message relay.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Real-time WebSocket message relay")]
struct Cli {
    /// Settings file (default: `$RELAY_SETTINGS` or `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent connections.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log filter when `RUST_LOG` is unset (e.g. `info`, `relay_server=debug`).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `pretty` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Layer explicit flags over loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.config.clone().unwrap_or_else(relay_settings::settings_path);
    let loaded = relay_settings::load_settings_from_path(&settings_path);
    let mut settings = loaded.as_ref().cloned().unwrap_or_default();
    cli.apply(&mut settings);

    relay_logging::init_subscriber(&settings.logging);
    if let Err(error) = &loaded {
        warn!(path = %settings_path.display(), %error, "failed to load settings, using defaults");
    }

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings.server);
    let server = RelayServer::new(config, Arc::new(UuidV7IdProvider), Some(metrics));

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("relay listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    let _ = server.shutdown().graceful_shutdown(handle, None).await;
    info!("shutdown complete");
    Ok(())
}
