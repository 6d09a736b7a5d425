//! `WebSocket` connection handling, registry, broadcast channel, and fan-out.

pub mod channel;
pub mod connection;
pub mod dispatcher;
pub mod ingress;
pub mod registry;
pub mod session;
pub mod transport;
