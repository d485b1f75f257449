//! Command scheduling and thread marshalling.
//!
//! Connections hand decoded requests to [`Dispatcher::enqueue`] from their
//! own I/O threads. Admission validates the method and parameters and
//! appends a pending call to a single global FIFO queue; the I/O thread never
//! waits for execution. The designated execution thread drains the queue by
//! calling [`Dispatcher::pump`] at its own cadence, running one handler at a
//! time to completion, so no two handler bodies ever overlap and editor state
//! needs no locking of its own.
//!
//! Each call moves through
//! `Queued -> Dispatched -> Executing -> Completed | Failed | TimedOut`, or
//! leaves the queue early as `TimedOut` or `Cancelled`. Every terminal state
//! produces at most one response, routed back to the originating connection
//! by id. Connections that have gone away resolve to nothing and the
//! response is dropped.

mod context;
mod dispatcher;
mod errors;
mod execution;
mod pending;
mod stats;


pub use self::context::CallContext;
pub use self::dispatcher::{Admission, Dispatcher, DispatcherSettings, PumpReport, ResponseTarget};
pub use self::errors::{CancelReason, DispatchError, ExecutionFault, TimeoutStage};
pub use self::pending::{CallId, CallState, ConnectionId, IllegalTransition};
pub use self::stats::DispatchStats;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
