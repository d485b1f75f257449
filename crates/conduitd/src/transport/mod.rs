//! Socket transport for the bridge.
//!
//! The listener binds the configured endpoint and accepts connections in a
//! background thread. Each connection is served by a
//! [`BridgeConnectionHandler`], which frames newline-delimited requests for
//! its connection adapter and writes responses from a dedicated thread.

mod errors;
mod handler;
mod listener;

pub use self::errors::ListenerError;
pub(crate) use self::handler::{BridgeConnectionHandler, ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::{ListenerHandle, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
