//! In-memory connection halves for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::ChatMessage;
use tokio::sync::mpsc;

use crate::websocket::connection::{ConnectionError, Inbound, MessageSink, MessageStream};

/// Sink that records every delivery and can be told to start failing.
#[derive(Default)]
pub(crate) struct RecordingSink {
    received: Mutex<Vec<ChatMessage>>,
    pings: AtomicUsize,
    closes: AtomicUsize,
    closed: AtomicBool,
    failing: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        let sink = Self::new();
        sink.set_failing();
        sink
    }

    /// A sink whose every `send` takes `delay` before it lands.
    pub(crate) fn slow(delay: Duration) -> Arc<Self> {
        let sink = Self::new();
        *sink.send_delay.lock() = Some(delay);
        sink
    }

    pub(crate) fn set_failing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn received(&self) -> Vec<ChatMessage> {
        self.received.lock().clone()
    }

    pub(crate) fn bodies(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|m| m.body().to_owned())
            .collect()
    }

    pub(crate) fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("broken pipe".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, message: &ChatMessage) -> Result<(), ConnectionError> {
        let delay = *self.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        self.received.lock().push(message.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        self.check()?;
        let _ = self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        let _ = self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Stream fed from a channel. Ends with `Closed` once the feeder is dropped.
pub(crate) struct ChannelStream {
    rx: mpsc::UnboundedReceiver<Result<Inbound, ConnectionError>>,
}

/// Feeder half of a [`ChannelStream`].
pub(crate) type StreamFeed = mpsc::UnboundedSender<Result<Inbound, ConnectionError>>;

impl ChannelStream {
    pub(crate) fn new() -> (StreamFeed, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// A stream that yields `items` and then reports the peer closed.
    pub(crate) fn scripted(items: Vec<Result<Inbound, ConnectionError>>) -> Self {
        let (tx, stream) = Self::new();
        for item in items {
            let _ = tx.send(item);
        }
        stream
    }
}

#[async_trait]
impl MessageStream for ChannelStream {
    async fn receive(&mut self) -> Result<Inbound, ConnectionError> {
        self.rx.recv().await.unwrap_or(Err(ConnectionError::Closed))
    }
}

pub(crate) fn inbound(sender: &str, body: &str) -> Result<Inbound, ConnectionError> {
    Ok(Inbound::Message(ChatMessage::new(sender, body)))
}
