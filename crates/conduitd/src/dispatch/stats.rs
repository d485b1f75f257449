//! Dispatcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::pending::CallState;

/// Snapshot of dispatcher activity since start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Calls admitted to the queue or run inline.
    pub enqueued: u64,
    /// Calls whose handler returned a result.
    pub completed: u64,
    /// Calls whose handler returned an error or panicked.
    pub failed: u64,
    /// Calls that exceeded their queue wait or execution budget.
    pub timed_out: u64,
    /// Calls cancelled before they ran.
    pub cancelled: u64,
    /// Requests refused at admission.
    pub rejected: u64,
    /// Calls currently waiting in the queue.
    pub queue_depth: usize,
    /// Whether a handler is running right now.
    pub executing: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_terminal(&self, state: CallState) {
        let counter = match state {
            CallState::Completed => &self.completed,
            CallState::Failed => &self.failed,
            CallState::TimedOut => &self.timed_out,
            CallState::Cancelled => &self.cancelled,
            CallState::Queued | CallState::Dispatched | CallState::Executing => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, queue_depth: usize, executing: bool) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            queue_depth,
            executing,
        }
    }
}
