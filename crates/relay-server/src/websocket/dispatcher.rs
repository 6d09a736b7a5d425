//! The single fan-out loop.
//!
//! The dispatcher is the only writer to any connection. It drains the
//! broadcast channel in order and writes each message to every registered
//! connection in join order. A failed write retires that connection on the
//! spot and the pass carries on with the next member. Heartbeat pings go out
//! from the same loop so they never interleave with message writes. A due
//! ping sweep is taken before the next queued message, so listeners keep
//! answering pings while the channel stays busy.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use relay_core::ChatMessage;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::Subscriber;
use super::connection::{ConnectionError, ConnectionId};
use super::registry::{BroadcastGuard, Registry};
use crate::metrics::{BROADCAST_DURATION_SECONDS, DELIVERY_FAILURES_TOTAL, MESSAGES_BROADCAST_TOTAL};

/// Why the dispatcher loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherExit {
    /// Every publisher was dropped and the queue is drained.
    ChannelClosed,
    /// The shutdown token fired.
    Cancelled,
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members that accepted the write.
    pub delivered: usize,
    /// Members retired because the write failed.
    pub retired: usize,
}

/// Drains the broadcast channel into the registry.
pub struct Dispatcher {
    registry: Arc<Registry>,
    subscriber: Subscriber,
    heartbeat: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher. `heartbeat` is the ping period, `None` to disable.
    pub fn new(registry: Arc<Registry>, subscriber: Subscriber, heartbeat: Option<Duration>) -> Self {
        Self {
            registry,
            subscriber,
            heartbeat,
            write_timeout: None,
        }
    }

    /// Bound every single write. A member whose write exceeds `timeout` is
    /// retired like one whose write failed.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Run until the channel closes or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> DispatcherExit {
        let mut ticker = self.heartbeat.map(|period| {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.subscriber.close();
                    return DispatcherExit::Cancelled;
                }
                () = next_tick(&mut ticker) => {
                    let _ = self.ping_all().await;
                }
                next = self.subscriber.next() => match next {
                    Some(message) => {
                        let _ = self.broadcast(&message).await;
                    }
                    None => return DispatcherExit::ChannelClosed,
                },
            }
        }
    }

    /// Write `message` to every registered connection.
    pub async fn broadcast(&self, message: &ChatMessage) -> BroadcastReport {
        let started = Instant::now();
        let mut guard = self.registry.snapshot_for_broadcast().await;
        let mut report = BroadcastReport::default();

        for (conn_id, sink) in guard.members() {
            match within(self.write_timeout, sink.send(message)).await {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(%conn_id, message_id = %message.id(), %error, "delivery failed, retiring connection");
                    retire(&mut guard, conn_id, &error).await;
                    report.retired += 1;
                }
            }
        }
        drop(guard);

        counter!(MESSAGES_BROADCAST_TOTAL).increment(1);
        histogram!(BROADCAST_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(
            message_id = %message.id(),
            recipients = report.delivered,
            retired = report.retired,
            "message broadcast"
        );
        report
    }

    /// Ping every registered connection, retiring those that fail.
    pub async fn ping_all(&self) -> BroadcastReport {
        let mut guard = self.registry.snapshot_for_broadcast().await;
        let mut report = BroadcastReport::default();

        for (conn_id, sink) in guard.members() {
            match within(self.write_timeout, sink.ping()).await {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(%conn_id, %error, "ping failed, retiring connection");
                    retire(&mut guard, conn_id, &error).await;
                    report.retired += 1;
                }
            }
        }
        debug!(pinged = report.delivered, retired = report.retired, "heartbeat sweep");
        report
    }
}

async fn retire(
    guard: &mut BroadcastGuard<'_>,
    conn_id: ConnectionId,
    error: &ConnectionError,
) {
    counter!(DELIVERY_FAILURES_TOTAL, "kind" => error.kind()).increment(1);
    let _ = guard.retire(conn_id).await;
}

async fn within<F>(limit: Option<Duration>, write: F) -> Result<(), ConnectionError>
where
    F: Future<Output = Result<(), ConnectionError>>,
{
    match limit {
        Some(limit) => time::timeout(limit, write)
            .await
            .unwrap_or(Err(ConnectionError::WriteTimeout(limit))),
        None => write.await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use relay_core::MessageId;

    use super::*;
    use crate::test_support::RecordingSink;
    use crate::websocket::channel::broadcast_channel;
    use crate::websocket::connection::MockMessageSink;

    fn id(n: u64) -> ConnectionId {
        ConnectionId::new(n)
    }

    fn stamped(sender: &str, body: &str, n: u32) -> ChatMessage {
        ChatMessage::new(sender, body).stamped(MessageId::from_string(format!("m-{n}")))
    }

    fn dispatcher(registry: &Arc<Registry>, heartbeat: Option<Duration>) -> Dispatcher {
        let (_publisher, subscriber) = broadcast_channel(8);
        Dispatcher::new(Arc::clone(registry), subscriber, heartbeat)
    }

    #[tokio::test]
    async fn delivers_to_every_member_including_sender() {
        let registry = Arc::new(Registry::new(8));
        let sinks: Vec<_> = (1..=3).map(|_| RecordingSink::new()).collect();
        for (n, sink) in (1..).zip(&sinks) {
            registry.add(id(n), sink.clone()).await.unwrap();
        }

        let report = dispatcher(&registry, None)
            .broadcast(&stamped("alice", "hi", 1))
            .await;

        assert_eq!(report, BroadcastReport { delivered: 3, retired: 0 });
        for sink in &sinks {
            let got = sink.received();
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].sender(), "alice");
            assert_eq!(got[0].body(), "hi");
            assert_eq!(got[0].id().as_str(), "m-1");
        }
    }

    #[tokio::test]
    async fn failed_member_is_retired_and_others_still_receive() {
        let registry = Arc::new(Registry::new(8));
        let a = RecordingSink::failing();
        let b = RecordingSink::new();
        let c = RecordingSink::new();
        registry.add(id(1), a.clone()).await.unwrap();
        registry.add(id(2), b.clone()).await.unwrap();
        registry.add(id(3), c.clone()).await.unwrap();

        let report = dispatcher(&registry, None)
            .broadcast(&stamped("bob", "still here", 1))
            .await;

        assert_eq!(report, BroadcastReport { delivered: 2, retired: 1 });
        assert!(a.is_closed());
        assert_eq!(a.close_count(), 1);
        assert_eq!(b.bodies(), vec!["still here"]);
        assert_eq!(c.bodies(), vec!["still here"]);
        assert_eq!(registry.ids().await, vec![id(2), id(3)]);
    }

    #[tokio::test]
    async fn mocked_sink_failure_closes_exactly_once() {
        let registry = Arc::new(Registry::new(8));

        let mut broken = MockMessageSink::new();
        let _ = broken
            .expect_send()
            .times(1)
            .returning(|_| Err(ConnectionError::Transport("connection reset".into())));
        let _ = broken.expect_close().times(1).return_const(());
        let healthy = RecordingSink::new();

        registry.add(id(1), Arc::new(broken)).await.unwrap();
        registry.add(id(2), healthy.clone()).await.unwrap();

        let d = dispatcher(&registry, None);
        let _ = d.broadcast(&stamped("x", "first", 1)).await;
        let _ = d.broadcast(&stamped("x", "second", 2)).await;

        assert_eq!(healthy.bodies(), vec!["first", "second"]);
        assert!(!registry.contains(id(1)).await);
    }

    #[tokio::test]
    async fn delivery_failure_is_logged_with_connection_id() {
        let (logs, _guard) = relay_logging::capture_logs();
        let registry = Arc::new(Registry::new(8));
        registry.add(id(7), RecordingSink::failing()).await.unwrap();

        let _ = dispatcher(&registry, None)
            .broadcast(&stamped("x", "y", 1))
            .await;

        let warning = logs
            .events()
            .into_iter()
            .find(|e| e.level == tracing::Level::WARN)
            .expect("a warning");
        assert!(warning.message.contains("delivery failed"));
        assert_eq!(warning.field("conn_id"), Some("conn-7"));
        assert_eq!(warning.field("message_id"), Some("m-1"));
    }

    #[tokio::test]
    async fn empty_registry_is_fine() {
        let registry = Arc::new(Registry::new(8));
        let report = dispatcher(&registry, None)
            .broadcast(&stamped("x", "y", 1))
            .await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn run_preserves_enqueue_order() {
        let registry = Arc::new(Registry::new(8));
        let sink = RecordingSink::new();
        registry.add(id(1), sink.clone()).await.unwrap();

        let (publisher, subscriber) = broadcast_channel(4);
        let d = Dispatcher::new(Arc::clone(&registry), subscriber, None);
        let task = tokio::spawn(d.run(CancellationToken::new()));

        for n in 0..20 {
            publisher.publish(stamped("p", &n.to_string(), n)).await.unwrap();
        }
        drop(publisher);

        assert_eq!(task.await.unwrap(), DispatcherExit::ChannelClosed);
        let expected: Vec<String> = (0..20).map(|n| n.to_string()).collect();
        assert_eq!(sink.bodies(), expected);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let registry = Arc::new(Registry::new(8));
        let (_publisher, subscriber) = broadcast_channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Dispatcher::new(registry, subscriber, None).run(cancel.clone()));
        cancel.cancel();
        assert_eq!(task.await.unwrap(), DispatcherExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_members_and_retires_dead_ones() {
        let registry = Arc::new(Registry::new(8));
        let alive = RecordingSink::new();
        let dead = RecordingSink::new();
        registry.add(id(1), alive.clone()).await.unwrap();
        registry.add(id(2), dead.clone()).await.unwrap();

        let (_publisher, subscriber) = broadcast_channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Dispatcher::new(Arc::clone(&registry), subscriber, Some(Duration::from_secs(30)))
                .run(cancel.clone()),
        );

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(alive.pings(), 0, "no ping before the first period");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(alive.pings(), 1);
        assert_eq!(dead.pings(), 1);

        dead.set_failing();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(alive.pings(), 2);
        assert!(dead.is_closed());
        assert_eq!(registry.ids().await, vec![id(1)]);

        cancel.cancel();
        assert_eq!(task.await.unwrap(), DispatcherExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_firing_while_channel_is_saturated() {
        let registry = Arc::new(Registry::new(8));
        let listener = RecordingSink::slow(Duration::from_secs(1));
        registry.add(id(1), listener.clone()).await.unwrap();

        let (publisher, subscriber) = broadcast_channel(512);
        for n in 0..300 {
            publisher.publish(stamped("p", &n.to_string(), n)).await.unwrap();
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Dispatcher::new(Arc::clone(&registry), subscriber, Some(Duration::from_secs(30)))
                .run(cancel.clone()),
        );

        tokio::time::sleep(Duration::from_secs(250)).await;
        assert!(listener.received().len() < 300, "queue should still be busy");
        assert!(listener.pings() >= 7, "pings = {}", listener.pings());
        assert_eq!(registry.ids().await, vec![id(1)]);

        cancel.cancel();
        assert_eq!(task.await.unwrap(), DispatcherExit::Cancelled);
        drop(publisher);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_is_retired_after_deadline() {
        let (logs, _guard) = relay_logging::capture_logs();
        let registry = Arc::new(Registry::new(8));
        let stalled = RecordingSink::slow(Duration::from_secs(3600));
        let healthy = RecordingSink::new();
        registry.add(id(1), stalled.clone()).await.unwrap();
        registry.add(id(2), healthy.clone()).await.unwrap();

        let started = tokio::time::Instant::now();
        let report = dispatcher(&registry, None)
            .with_write_timeout(Some(Duration::from_secs(5)))
            .broadcast(&stamped("x", "hello", 1))
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report, BroadcastReport { delivered: 1, retired: 1 });
        assert!(stalled.is_closed());
        assert!(stalled.received().is_empty());
        assert_eq!(healthy.bodies(), vec!["hello"]);
        assert_eq!(registry.ids().await, vec![id(2)]);
        assert!(logs.has_event(tracing::Level::WARN, "delivery failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_write_within_deadline_is_delivered() {
        let registry = Arc::new(Registry::new(8));
        let slow = RecordingSink::slow(Duration::from_secs(2));
        registry.add(id(1), slow.clone()).await.unwrap();

        let report = dispatcher(&registry, None)
            .with_write_timeout(Some(Duration::from_secs(5)))
            .broadcast(&stamped("x", "late but fine", 1))
            .await;

        assert_eq!(report, BroadcastReport { delivered: 1, retired: 0 });
        assert_eq!(slow.bodies(), vec!["late but fine"]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_pings_when_heartbeat_disabled() {
        let registry = Arc::new(Registry::new(8));
        let sink = RecordingSink::new();
        registry.add(id(1), sink.clone()).await.unwrap();

        let (_publisher, subscriber) = broadcast_channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Dispatcher::new(registry, subscriber, None).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sink.pings(), 0);
        cancel.cancel();
        let _ = task.await.unwrap();
    }
}
