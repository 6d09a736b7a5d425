//! The connection abstraction the relay core is written against.
//!
//! A live client is split into a [`MessageSink`] (write half, owned by the
//! registry and written only by the dispatcher) and a [`MessageStream`]
//! (read half, owned by the connection's ingress loop).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::ChatMessage;
use thiserror::Error;

/// Process-unique connection identifier, assigned in join order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw sequence number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw sequence number.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One successful read from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A chat message, not yet stamped with a server ID.
    Message(ChatMessage),
    /// A control frame (ping or pong). Proves liveness, carries nothing.
    Heartbeat,
}

/// Why a read or write on a connection failed. Every variant is terminal.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer closed the connection or the stream ended.
    #[error("connection closed")]
    Closed,

    /// The transport reported an I/O or protocol error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The client sent something that is not a chat message.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Nothing was received within the idle deadline.
    #[error("no frame received within {0:?}")]
    IdleTimeout(Duration),

    /// A single write did not complete within the write deadline.
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

impl ConnectionError {
    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
            Self::Encode(_) => "encode",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::WriteTimeout(_) => "write_timeout",
        }
    }
}

/// Write half of a connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: &ChatMessage) -> Result<(), ConnectionError>;

    /// Send a liveness probe.
    async fn ping(&self) -> Result<(), ConnectionError>;

    /// Release the transport. Idempotent.
    async fn close(&self);
}

/// Read half of a connection.
#[async_trait]
pub trait MessageStream: Send {
    /// Wait for the next inbound frame.
    async fn receive(&mut self) -> Result<Inbound, ConnectionError>;
}
