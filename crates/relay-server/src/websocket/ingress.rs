//! Per-connection read loop.

use metrics::counter;
use tokio::time;
use tracing::{debug, trace};

use super::connection::{ConnectionError, ConnectionId, Inbound, MessageStream};
use crate::context::RelayContext;
use crate::metrics::MESSAGES_RECEIVED_TOTAL;

/// Why an ingress loop ended.
#[derive(Debug)]
pub enum IngressExit {
    /// The peer closed the connection.
    Closed,
    /// A read failed (transport error, malformed payload, idle timeout).
    Failed(ConnectionError),
    /// The broadcast channel is gone; the server is shutting down.
    ChannelClosed,
}

/// Read from `stream` until it fails, publishing every message with a fresh
/// server id. On exit the connection is retired from the registry.
pub async fn run_ingress<S>(conn_id: ConnectionId, mut stream: S, ctx: &RelayContext) -> IngressExit
where
    S: MessageStream,
{
    let exit = loop {
        let next = match ctx.idle_timeout {
            Some(limit) => time::timeout(limit, stream.receive())
                .await
                .unwrap_or(Err(ConnectionError::IdleTimeout(limit))),
            None => stream.receive().await,
        };

        match next {
            Ok(Inbound::Heartbeat) => trace!(%conn_id, "heartbeat"),
            Ok(Inbound::Message(message)) => {
                let message = message.stamped(ctx.ids.next_id());
                counter!(MESSAGES_RECEIVED_TOTAL).increment(1);
                debug!(%conn_id, message_id = %message.id(), sender = message.sender(), "message received");
                if ctx.publisher.publish(message).await.is_err() {
                    break IngressExit::ChannelClosed;
                }
            }
            Err(ConnectionError::Closed) => break IngressExit::Closed,
            Err(error) => break IngressExit::Failed(error),
        }
    };

    let _ = ctx.registry.retire(conn_id).await;
    exit
}
