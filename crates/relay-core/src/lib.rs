//! # relay-core
//!
//! Foundation types shared by every relay crate.
//!
//! - [`message::ChatMessage`]: the immutable value that flows from a client,
//!   through the broadcast channel, to every connected client
//! - [`ids::IdProvider`]: the injected source of server-assigned message IDs

#![deny(unsafe_code)]

pub mod ids;
pub mod message;

pub use ids::{IdProvider, SequentialIdProvider, UuidV7IdProvider};
pub use message::{ChatMessage, MessageId};
