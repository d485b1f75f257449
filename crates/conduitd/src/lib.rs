//! Command bridge between external clients and a single-threaded editor.
//!
//! Clients connect over a socket configured via [`conduit_config`] and send
//! newline-delimited JSON requests naming a registered method. Connections
//! are served on their own I/O threads, but every editor-bound handler runs
//! on one designated execution thread, one call at a time, in the global
//! order in which requests arrived. The editor drives that thread by pumping
//! the [`Dispatcher`] from its own tick.
//!
//! The pieces, from the wire inwards:
//!
//! - [`protocol`] decodes request frames and encodes responses.
//! - [`connection`] owns one client connection and routes its traffic.
//! - [`dispatch`] queues calls, marshals them onto the execution thread and
//!   enforces timeouts, cancellation and thread affinity.
//! - [`registry`] maps method names to handlers, parameter schemas and
//!   affinities, frozen before serving starts.
//!
//! [`bootstrap_with`] wires these together with configuration, structured
//! telemetry and health reporting.

mod bootstrap;
pub mod connection;
pub mod dispatch;
pub mod editor;
mod health;
pub mod protocol;
pub mod registry;
mod runtime;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, Bridge, ConfigLoader, ServeError, Serving, StaticConfigLoader,
    SystemConfigLoader, bootstrap_with,
};
pub use dispatch::Dispatcher;
pub use health::{HealthReporter, StructuredHealthReporter};
pub use runtime::{ExecutionLoop, LoopSummary, Reaper};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
