//! Per-call context handed to handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::protocol::RequestId;
use crate::registry::HandlerError;

/// Execution-time view of one dispatched call.
///
/// Long-running handlers should call [`CallContext::checkpoint`] at safe
/// points so the dispatcher can enforce the execution budget. Handlers that
/// never check simply run to completion.
#[derive(Debug)]
pub struct CallContext {
    method: String,
    request_id: Option<RequestId>,
    started: Instant,
    budget: Duration,
    cancel_requested: Arc<AtomicBool>,
}

impl CallContext {
    pub(crate) fn new(
        method: String,
        request_id: RequestId,
        budget: Duration,
        cancel_requested: Arc<AtomicBool>,
    ) -> Self {
        Self {
            method,
            request_id: Some(request_id),
            started: Instant::now(),
            budget,
            cancel_requested,
        }
    }

    /// Context for invoking a handler outside the dispatcher, with no
    /// request id and an unbounded budget.
    pub fn detached(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            request_id: None,
            started: Instant::now(),
            budget: Duration::MAX,
            cancel_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Method being executed.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Correlation token of the request, if dispatched from a connection.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Instant at which the execution budget runs out.
    ///
    /// Returns `None` when the budget is unbounded.
    pub fn deadline(&self) -> Option<Instant> {
        self.started.checked_add(self.budget)
    }

    /// Time spent executing so far.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget remaining before [`CallContext::checkpoint`] fails.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Returns true once the originating connection has gone away.
    ///
    /// The call still runs to completion; its result is discarded. Handlers
    /// may use this to skip optional work.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Cooperative timeout check.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::TimedOut`] once the execution budget has been
    /// exhausted. Handlers should propagate it with `?`.
    pub fn checkpoint(&self) -> Result<(), HandlerError> {
        if self.elapsed() >= self.budget {
            return Err(HandlerError::TimedOut {
                budget: self.budget,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn checkpoint_fails_after_budget() {
        let context = CallContext::new(
            "editor.wait".into(),
            RequestId::from(1),
            Duration::from_millis(5),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(context.checkpoint().is_ok());
        thread::sleep(Duration::from_millis(10));
        assert_eq!(
            context.checkpoint(),
            Err(HandlerError::TimedOut {
                budget: Duration::from_millis(5)
            })
        );
        assert_eq!(context.remaining(), Duration::ZERO);
    }

    #[test]
    fn detached_contexts_never_time_out() {
        let context = CallContext::detached("asset.list");
        assert!(context.checkpoint().is_ok());
        assert!(context.request_id().is_none());
        assert!(context.deadline().is_none());
    }

    #[test]
    fn cancellation_is_visible_to_handlers() {
        let flag = Arc::new(AtomicBool::new(false));
        let context = CallContext::new(
            "asset.list".into(),
            RequestId::from("a"),
            Duration::from_secs(1),
            Arc::clone(&flag),
        );
        assert!(!context.cancel_requested());
        flag.store(true, Ordering::SeqCst);
        assert!(context.cancel_requested());
    }
}
