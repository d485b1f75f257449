//! Error types for socket listener operations.

use std::io;

use thiserror::Error;

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP host name could not be resolved.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no address.
    #[error("{endpoint} resolved to no addresses")]
    ResolveEmpty { endpoint: String },
    /// The operating system refused the bind.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to enable non-blocking accepts: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported on this platform: {endpoint}")]
    UnsupportedUnix { endpoint: String },
    /// Another process is serving on the socket.
    #[cfg(unix)]
    #[error("unix socket {path} is already in use")]
    UnixInUse { path: String },
    /// Something other than a socket occupies the path.
    #[cfg(unix)]
    #[error("{path} exists and is not a unix socket")]
    UnixNotSocket { path: String },
    /// A leftover socket file could not be inspected or removed.
    #[cfg(unix)]
    #[error("failed to replace stale unix socket {path}: {source}")]
    StaleSocket {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    #[error("listener thread panicked")]
    ThreadPanic,
}
