//! # relay-server
//!
//! Axum HTTP + `WebSocket` relay.
//!
//! - `GET /ws`: upgrade, register the connection, run its ingress loop
//! - One bounded broadcast channel that orders every inbound message
//! - One dispatcher task that writes each message to every registered
//!   connection in join order, retiring any connection whose write fails
//! - `GET /`, `GET /health`, `GET /metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ServerConfig;
pub use context::RelayContext;
pub use errors::ServerError;
pub use server::RelayServer;
