//! Error types for message socket operations.

use std::io;

use thiserror::Error;

/// Errors surfaced by message sockets and their factories.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Receive window elapsed without a complete message.
    #[error("receive timed out")]
    Timeout,
    /// The socket was closed locally.
    #[error("socket is closed")]
    Closed,
    /// Send was attempted with no peer attached.
    #[error("no peer attached")]
    NoPeer,
    /// The address uses a transport the factory does not implement.
    #[error("unsupported transport '{scheme}' for endpoint {endpoint}")]
    UnsupportedTransport { scheme: String, endpoint: String },
    /// Resolving a TCP host failed.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Binding the listener failed.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// A stale ipc rendezvous file could not be removed before bind.
    #[error("failed to remove stale ipc socket {path}: {source}")]
    StaleSocketCleanup {
        path: String,
        #[source]
        source: io::Error,
    },
    /// IO failure while reading or writing.
    #[error("socket IO error: {source}")]
    Io {
        #[source]
        source: io::Error,
    },
}

impl SocketError {
    pub(crate) fn from_io(source: io::Error) -> Self {
        Self::Io { source }
    }
}
