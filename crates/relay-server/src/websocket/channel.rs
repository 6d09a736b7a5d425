//! The broadcast channel: a bounded FIFO between every ingress loop and the
//! single dispatcher.

use relay_core::ChatMessage;
use thiserror::Error;
use tokio::sync::mpsc;

/// Publishing failed because the dispatcher side is gone.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The subscriber was dropped or closed.
    #[error("broadcast channel closed")]
    Closed,
}

/// Create a channel holding at most `capacity` pending messages (minimum 1).
pub fn broadcast_channel(capacity: usize) -> (Publisher, Subscriber) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Publisher { tx }, Subscriber { rx })
}

/// Producer handle, one clone per ingress loop.
#[derive(Clone, Debug)]
pub struct Publisher {
    tx: mpsc::Sender<ChatMessage>,
}

impl Publisher {
    /// Enqueue a message, waiting while the channel is full. Never drops.
    pub async fn publish(&self, message: ChatMessage) -> Result<(), PublishError> {
        self.tx.send(message).await.map_err(|_| PublishError::Closed)
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer handle, owned by the dispatcher.
#[derive(Debug)]
pub struct Subscriber {
    rx: mpsc::Receiver<ChatMessage>,
}

impl Subscriber {
    /// Next message in enqueue order; `None` once every publisher is dropped
    /// and the queue is drained.
    pub async fn next(&mut self) -> Option<ChatMessage> {
        self.rx.recv().await
    }

    /// Stop accepting new messages. Already-queued messages can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fifo_order() {
        let (publisher, mut subscriber) = broadcast_channel(8);
        for n in 0..5 {
            publisher
                .publish(ChatMessage::new("alice", n.to_string()))
                .await
                .unwrap();
        }
        for n in 0..5 {
            assert_eq!(subscriber.next().await.unwrap().body(), n.to_string());
        }
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let (publisher, _subscriber) = broadcast_channel(0);
        assert_eq!(publisher.capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_blocks_instead_of_dropping() {
        let (publisher, mut subscriber) = broadcast_channel(1);
        publisher.publish(ChatMessage::new("a", "1")).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            publisher.publish(ChatMessage::new("a", "2")),
        )
        .await;
        assert!(blocked.is_err(), "publish should wait while full");

        let waiting = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.publish(ChatMessage::new("a", "3")).await })
        };
        assert_eq!(subscriber.next().await.unwrap().body(), "1");
        waiting.await.unwrap().unwrap();
        assert_eq!(subscriber.next().await.unwrap().body(), "3");
    }

    #[tokio::test]
    async fn publish_after_subscriber_dropped_fails() {
        let (publisher, subscriber) = broadcast_channel(4);
        drop(subscriber);
        let err = publisher.publish(ChatMessage::new("a", "b")).await.unwrap_err();
        assert_eq!(err, PublishError::Closed);
    }

    #[tokio::test]
    async fn subscriber_ends_when_publishers_dropped() {
        let (publisher, mut subscriber) = broadcast_channel(4);
        publisher.publish(ChatMessage::new("a", "last")).await.unwrap();
        drop(publisher);
        assert_eq!(subscriber.next().await.unwrap().body(), "last");
        assert!(subscriber.next().await.is_none());
    }
}
