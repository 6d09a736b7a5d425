//! The set of connections eligible to receive broadcasts.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::gauge;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::connection::{ConnectionId, MessageSink};
use crate::metrics::CONNECTIONS_ACTIVE;

type Members = BTreeMap<ConnectionId, Arc<dyn MessageSink>>;

/// Registration failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection limit is reached.
    #[error("registry full ({capacity} connections)")]
    Full {
        /// Configured limit.
        capacity: usize,
    },
}

/// Live connections keyed by [`ConnectionId`].
///
/// Every operation holds one async mutex over the whole set. Iteration is in
/// ascending id order, which is join order.
pub struct Registry {
    members: Mutex<Members>,
    capacity: usize,
}

impl Registry {
    /// Create an empty registry that admits at most `capacity` connections.
    pub fn new(capacity: usize) -> Self {
        Self {
            members: Mutex::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Connection limit.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a connection. Re-adding a present id is a no-op.
    pub async fn add(
        &self,
        id: ConnectionId,
        sink: Arc<dyn MessageSink>,
    ) -> Result<(), RegistryError> {
        let mut members = self.members.lock().await;
        if members.contains_key(&id) {
            return Ok(());
        }
        if members.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        let _ = members.insert(id, sink);
        record_size(members.len());
        debug!(conn_id = %id, members = members.len(), "connection registered");
        Ok(())
    }

    /// Unregister a connection, handing back its sink. Idempotent.
    ///
    /// The caller owns closing the returned sink; [`Registry::retire`] does both.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<dyn MessageSink>> {
        let mut members = self.members.lock().await;
        take(&mut members, id)
    }

    /// Unregister and close a connection. Returns whether it was present.
    pub async fn retire(&self, id: ConnectionId) -> bool {
        match self.remove(id).await {
            Some(sink) => {
                sink.close().await;
                true
            }
            None => false,
        }
    }

    /// Exclusive access for one fan-out pass.
    ///
    /// Adds and removes wait until the guard is dropped; removals made through
    /// the guard take effect immediately.
    pub async fn snapshot_for_broadcast(&self) -> BroadcastGuard<'_> {
        BroadcastGuard {
            members: self.members.lock().await,
        }
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    /// Whether the connection limit is reached.
    pub async fn is_full(&self) -> bool {
        self.members.lock().await.len() >= self.capacity
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    /// Registered ids in join order.
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.members.lock().await.keys().copied().collect()
    }
}

/// Exclusive view of the registry held for one broadcast.
pub struct BroadcastGuard<'a> {
    members: MutexGuard<'a, Members>,
}

impl BroadcastGuard<'_> {
    /// Members in join order.
    pub fn members(&self) -> Vec<(ConnectionId, Arc<dyn MessageSink>)> {
        self.members
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Remove and close a member whose write failed.
    pub async fn retire(&mut self, id: ConnectionId) -> bool {
        match take(&mut self.members, id) {
            Some(sink) => {
                sink.close().await;
                true
            }
            None => false,
        }
    }
}

fn take(members: &mut Members, id: ConnectionId) -> Option<Arc<dyn MessageSink>> {
    let removed = members.remove(&id);
    if removed.is_some() {
        record_size(members.len());
        debug!(conn_id = %id, members = members.len(), "connection unregistered");
    }
    removed
}

#[allow(clippy::cast_precision_loss)]
fn record_size(len: usize) {
    gauge!(CONNECTIONS_ACTIVE).set(len as f64);
}
