//! Pending call records and their state machine.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::protocol::RequestId;
use crate::registry::HandlerDescriptor;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Opaque handle naming one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates a process-unique connection id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "conn-{}", self.0)
    }
}

/// Dispatcher-assigned identifier for one accepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub(crate) u64);

impl fmt::Display for CallId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "call-{}", self.0)
    }
}

/// Lifecycle of a pending call.
///
/// ```text
/// Queued -> Dispatched -> Executing -> Completed | Failed | TimedOut
///    \
///     -> TimedOut | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Queued,
    Dispatched,
    Executing,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl CallState {
    /// Returns true for states after which the call is forgotten.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Returns true when `self -> next` is a legal transition.
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Dispatched | Self::TimedOut | Self::Cancelled)
                | (Self::Dispatched, Self::Executing)
                | (
                    Self::Executing,
                    Self::Completed | Self::Failed | Self::TimedOut
                )
        )
    }

    /// Lower-case name used in log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal transition {from} -> {to} for {call}")]
pub struct IllegalTransition {
    pub call: CallId,
    pub from: CallState,
    pub to: CallState,
}

/// Call accepted by the dispatcher and not yet resolved.
///
/// The call refers to its connection only by id; the dispatcher resolves
/// the id when delivering and drops the response if the connection is gone.
pub(crate) struct PendingCall {
    pub(crate) id: CallId,
    pub(crate) connection: ConnectionId,
    pub(crate) request_id: RequestId,
    pub(crate) descriptor: Arc<HandlerDescriptor>,
    params: Option<Value>,
    pub(crate) enqueued_at: Instant,
    state: CallState,
    pub(crate) cancel_requested: Arc<AtomicBool>,
}

impl PendingCall {
    pub(crate) fn new(
        id: CallId,
        connection: ConnectionId,
        request_id: RequestId,
        descriptor: Arc<HandlerDescriptor>,
        params: Value,
    ) -> Self {
        Self {
            id,
            connection,
            request_id,
            descriptor,
            params: Some(params),
            enqueued_at: Instant::now(),
            state: CallState::Queued,
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn state(&self) -> CallState {
        self.state
    }

    pub(crate) fn method(&self) -> &str {
        self.descriptor.method()
    }

    pub(crate) fn advance(&mut self, next: CallState) -> Result<(), IllegalTransition> {
        if !self.state.can_advance_to(next) {
            return Err(IllegalTransition {
                call: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn take_params(&mut self) -> Value {
        self.params.take().unwrap_or(Value::Null)
    }

    pub(crate) fn waited(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PendingCall")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("request_id", &self.request_id)
            .field("method", &self.method())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
