//! Process-wide relay state shared by the handshake handler and every
//! connection's ingress loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use relay_core::IdProvider;

use crate::config::ServerConfig;
use crate::websocket::channel::{Publisher, Subscriber, broadcast_channel};
use crate::websocket::connection::ConnectionId;
use crate::websocket::registry::Registry;

/// Shared relay state. Built once per server and passed explicitly.
pub struct RelayContext {
    /// Registered connections.
    pub registry: Arc<Registry>,
    /// Producer side of the broadcast channel.
    pub publisher: Publisher,
    /// Source of server-assigned message ids.
    pub ids: Arc<dyn IdProvider>,
    /// Per-connection read deadline.
    pub idle_timeout: Option<Duration>,
    /// Largest accepted `WebSocket` message.
    pub max_message_size: usize,
    next_connection: AtomicU64,
}

impl RelayContext {
    /// Build the context and the subscriber half that the dispatcher drains.
    pub fn new(config: &ServerConfig, ids: Arc<dyn IdProvider>) -> (Self, Subscriber) {
        let (publisher, subscriber) = broadcast_channel(config.channel_capacity);
        let context = Self {
            registry: Arc::new(Registry::new(config.max_connections)),
            publisher,
            ids,
            idle_timeout: config.idle_timeout,
            max_message_size: config.max_message_size,
            next_connection: AtomicU64::new(1),
        };
        (context, subscriber)
    }

    /// Allocate the next connection id. Ids increase in join order.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }
}
