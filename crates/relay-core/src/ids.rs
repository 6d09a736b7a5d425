//! Server-side message ID generation.
//!
//! The relay never trusts a client-supplied ID. Every inbound message is
//! stamped by an [`IdProvider`] injected at startup, so tests can swap the
//! time-ordered UUID generator for a deterministic sequence.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::message::MessageId;

/// Source of unique message IDs.
///
/// Implementations must be safe to call concurrently from every ingress
/// loop and must never return the same ID twice within a process.
pub trait IdProvider: Send + Sync {
    /// Produce the next ID.
    fn next_id(&self) -> MessageId;
}

/// UUID v7 IDs: unique, and roughly ordered by creation time.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7IdProvider;

impl IdProvider for UuidV7IdProvider {
    fn next_id(&self) -> MessageId {
        MessageId::from_string(Uuid::now_v7().to_string())
    }
}

/// Monotonic counter IDs of the form `{prefix}-{n}`, starting at 1.
#[derive(Debug)]
pub struct SequentialIdProvider {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdProvider {
    /// Create a provider with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialIdProvider {
    fn default() -> Self {
        Self::new("msg")
    }
}

impl IdProvider for SequentialIdProvider {
    fn next_id(&self) -> MessageId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        MessageId::from_string(format!("{}-{n}", self.prefix))
    }
}
