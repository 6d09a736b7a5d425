//! Server-level errors.

use thiserror::Error;

/// Errors surfaced while starting the relay.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `listen` was called a second time on the same server.
    #[error("server is already listening")]
    AlreadyListening,

    /// The global Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    MetricsRecorder(String),
}
