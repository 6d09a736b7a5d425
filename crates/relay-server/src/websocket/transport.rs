//! Adapter from an axum [`WebSocket`] to the connection traits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::ChatMessage;
use tokio::sync::Mutex;
use tracing::debug;

use super::connection::{ConnectionError, Inbound, MessageSink, MessageStream};

/// Upper bound on the close handshake with a peer that has stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Split an upgraded socket into its write and read halves.
pub fn split_socket(socket: WebSocket) -> (WsSink, WsStream) {
    let (tx, rx) = socket.split();
    (
        WsSink {
            inner: Mutex::new(tx),
            closed: AtomicBool::new(false),
        },
        WsStream { inner: rx },
    )
}

/// Write half of an upgraded socket.
pub struct WsSink {
    inner: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl WsSink {
    async fn write(&self, frame: Message) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        self.inner
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&self, message: &ChatMessage) -> Result<(), ConnectionError> {
        let text = message.to_json()?;
        self.write(Message::Text(text.into())).await
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        self.write(Message::Ping(Vec::new().into())).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let closing = async {
            let mut sink = self.inner.lock().await;
            // peer may already be gone
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            debug!("close handshake timed out, dropping write half");
        }
    }
}

/// Read half of an upgraded socket.
pub struct WsStream {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl MessageStream for WsStream {
    async fn receive(&mut self) -> Result<Inbound, ConnectionError> {
        match self.inner.next().await {
            None => Err(ConnectionError::Closed),
            Some(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
            Some(Ok(frame)) => decode_frame(frame),
        }
    }
}

/// Interpret one frame. Binary frames must carry UTF-8 JSON like text frames.
pub fn decode_frame(frame: Message) -> Result<Inbound, ConnectionError> {
    match frame {
        Message::Text(text) => decode_text(text.as_str()),
        Message::Binary(data) => {
            let text = std::str::from_utf8(&data).map_err(|_| {
                ConnectionError::Malformed(format!("binary frame of {} bytes is not UTF-8", data.len()))
            })?;
            decode_text(text)
        }
        Message::Ping(_) | Message::Pong(_) => Ok(Inbound::Heartbeat),
        Message::Close(frame) => {
            debug!(?frame, "client sent close frame");
            Err(ConnectionError::Closed)
        }
    }
}

fn decode_text(text: &str) -> Result<Inbound, ConnectionError> {
    ChatMessage::from_json(text)
        .map(Inbound::Message)
        .map_err(|e| ConnectionError::Malformed(e.to_string()))
}
