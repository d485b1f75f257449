//! Global FIFO scheduler marshalling calls onto the execution thread.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use conduit_config::{
    Config, DEFAULT_EXECUTION_BUDGET_MS, DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_QUEUE_TIMEOUT_MS,
};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::protocol::{CommandRequest, CommandResponse, RequestId};
use crate::registry::{CommandRegistry, HandlerDescriptor, ThreadAffinity};

use super::DISPATCH_TARGET;
use super::context::CallContext;
use super::errors::{CancelReason, DispatchError, ExecutionFault, TimeoutStage};
use super::execution;
use super::pending::{CallId, CallState, ConnectionId, PendingCall};
use super::stats::{Counters, DispatchStats};

/// Receiver of completed responses for one connection.
pub trait ResponseTarget: Send + Sync {
    /// Accepts a response. Must not block on network I/O.
    fn deliver(&self, response: CommandResponse);
}

/// Scheduling policy applied by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Longest a call may wait while queued.
    pub queue_timeout: Duration,
    /// Cooperative run budget reported through [`CallContext`].
    pub execution_budget: Duration,
    /// Admission bound on the global queue.
    pub max_queue_depth: usize,
    /// Cap on calls executed by one pump; `None` drains the queue.
    pub max_calls_per_pump: Option<usize>,
    /// Run any-thread handlers on the calling I/O thread.
    pub inline_any_thread: bool,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            queue_timeout: Duration::from_millis(DEFAULT_QUEUE_TIMEOUT_MS),
            execution_budget: Duration::from_millis(DEFAULT_EXECUTION_BUDGET_MS),
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            max_calls_per_pump: None,
            inline_any_thread: false,
        }
    }
}

impl From<&Config> for DispatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            queue_timeout: config.queue_timeout(),
            execution_budget: config.execution_budget(),
            max_queue_depth: config.max_queue_depth(),
            max_calls_per_pump: config.max_calls_per_pump(),
            inline_any_thread: config.inline_any_thread(),
        }
    }
}

/// Result of admitting a request.
#[derive(Debug)]
pub enum Admission {
    /// The call joined the queue; its response is delivered after it runs.
    Queued(CallId),
    /// The call ran inline and its response is ready.
    Completed(CommandResponse),
}

/// Work done by one pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Handlers run to completion.
    pub executed: usize,
    /// Queued calls that timed out before running.
    pub expired: usize,
}

/// Shared handle to the scheduler. Clones refer to the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    registry: CommandRegistry,
    settings: DispatcherSettings,
    state: Mutex<State>,
    next_call: AtomicU64,
    execution_thread: OnceCell<ThreadId>,
    pumping: AtomicBool,
    counters: Counters,
}

#[derive(Default)]
struct State {
    queue: VecDeque<PendingCall>,
    in_flight: Option<PendingCall>,
    connections: HashMap<ConnectionId, Weak<dyn ResponseTarget>>,
    closed: bool,
}

struct Outbound {
    connection: ConnectionId,
    response: CommandResponse,
}

struct Started {
    call: CallId,
    descriptor: Arc<HandlerDescriptor>,
    context: CallContext,
    params: Value,
}

impl Dispatcher {
    /// Creates a dispatcher over a frozen registry.
    pub fn new(registry: CommandRegistry, settings: DispatcherSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                settings,
                state: Mutex::new(State::default()),
                next_call: AtomicU64::new(1),
                execution_thread: OnceCell::new(),
                pumping: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// Registry the dispatcher resolves methods against.
    pub fn registry(&self) -> &CommandRegistry {
        &self.shared.registry
    }

    /// Active scheduling policy.
    pub fn settings(&self) -> &DispatcherSettings {
        &self.shared.settings
    }

    /// Registers the response target for a connection.
    ///
    /// The dispatcher holds the target weakly, so a dropped connection
    /// resolves to "gone" and its responses are discarded.
    pub fn attach(&self, connection: ConnectionId, target: Weak<dyn ResponseTarget>) {
        let mut state = self.lock();
        state
            .connections
            .retain(|_, existing| existing.strong_count() > 0);
        state.connections.insert(connection, target);
        debug!(target: DISPATCH_TARGET, %connection, "connection attached");
    }

    /// Validates and admits a request without waiting for it to run.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownMethod`] or
    /// [`DispatchError::InvalidParams`] when the request fails validation,
    /// [`DispatchError::QueueFull`] when the queue is at capacity, and
    /// [`DispatchError::Cancelled`] after [`Dispatcher::shutdown`]. Rejected
    /// requests never enter the queue.
    pub fn enqueue(
        &self,
        connection: ConnectionId,
        request: CommandRequest,
    ) -> Result<Admission, DispatchError> {
        let (request_id, method, params) = request.into_parts();
        let descriptor = match self.shared.registry.lookup(&method) {
            Ok(descriptor) => Arc::clone(descriptor),
            Err(_) => {
                return Err(self.reject(connection, DispatchError::unknown_method(method)));
            }
        };
        if let Err(violation) = descriptor.validate_params(&params) {
            return Err(self.reject(
                connection,
                DispatchError::invalid_params(method, &violation),
            ));
        }

        if self.shared.settings.inline_any_thread
            && descriptor.thread_affinity() == ThreadAffinity::AnyThread
        {
            return self.run_inline(connection, descriptor, request_id, params);
        }

        let mut state = self.lock();
        if state.closed {
            drop(state);
            return Err(self.reject(
                connection,
                DispatchError::Cancelled {
                    method,
                    reason: CancelReason::ShuttingDown,
                },
            ));
        }
        let depth = state.queue.len();
        if depth >= self.shared.settings.max_queue_depth {
            drop(state);
            return Err(self.reject(connection, DispatchError::QueueFull { depth }));
        }

        let call = CallId(self.shared.next_call.fetch_add(1, Ordering::Relaxed));
        state.queue.push_back(PendingCall::new(
            call,
            connection,
            request_id,
            descriptor,
            params,
        ));
        self.shared.counters.record_enqueued();
        debug!(
            target: DISPATCH_TARGET,
            call_id = %call,
            %connection,
            method = %method,
            state = %CallState::Queued,
            depth = depth + 1,
            "call queued"
        );
        Ok(Admission::Queued(call))
    }

    /// Runs queued calls on the current thread.
    ///
    /// The first thread to pump (or to call
    /// [`Dispatcher::bind_execution_thread`]) becomes the execution thread.
    /// Calls run one at a time, in enqueue order, each to completion before
    /// the next begins.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionFault::Reentrant`] when a pump is already running,
    /// for example when a handler calls `pump` itself. Returns
    /// [`ExecutionFault::ThreadAffinityViolation`] when the head of the queue
    /// is a main-thread call and this is not the execution thread; that call
    /// stays at the head of the queue.
    pub fn pump(&self) -> Result<PumpReport, ExecutionFault> {
        let current = thread::current().id();
        let execution_thread = *self.shared.execution_thread.get_or_init(|| current);
        let Some(_guard) = PumpGuard::acquire(&self.shared.pumping) else {
            warn!(target: DISPATCH_TARGET, "re-entrant pump refused");
            return Err(ExecutionFault::Reentrant);
        };

        let mut report = PumpReport {
            expired: self.reap_expired(),
            ..PumpReport::default()
        };
        loop {
            if let Some(limit) = self.shared.settings.max_calls_per_pump
                && report.executed >= limit
            {
                break;
            }
            let Some(started) = self.begin_next(execution_thread, &mut report)? else {
                break;
            };
            let outcome = execution::run(&started.descriptor, &started.context, started.params);
            self.finish(started.call, &started.context, outcome);
            report.executed += 1;
        }
        Ok(report)
    }

    /// Cancels every call owned by a closing connection and detaches it.
    ///
    /// Queued calls are removed without running. A call that is already
    /// executing finishes, and its result is discarded. Returns the number of
    /// queued calls removed.
    pub fn cancel(&self, connection: ConnectionId) -> usize {
        let mut state = self.lock();
        state.connections.remove(&connection);

        let mut cancelled = 0;
        let queue = std::mem::take(&mut state.queue);
        for mut call in queue {
            if call.connection != connection {
                state.queue.push_back(call);
                continue;
            }
            call.request_cancel();
            self.settle(&mut call, CallState::Cancelled);
            cancelled += 1;
        }

        if let Some(call) = state.in_flight.as_ref()
            && call.connection == connection
        {
            call.request_cancel();
            debug!(
                target: DISPATCH_TARGET,
                call_id = %call.id,
                %connection,
                method = call.method(),
                "connection closed while executing; result will be discarded"
            );
        }
        drop(state);

        debug!(target: DISPATCH_TARGET, %connection, cancelled, "connection detached");
        cancelled
    }

    /// Times out queued calls that have waited longer than the queue timeout.
    ///
    /// Safe to call from any thread. Returns the number of calls expired.
    pub fn reap_expired(&self) -> usize {
        let timeout = self.shared.settings.queue_timeout;
        let mut outbound = Vec::new();
        {
            let mut state = self.lock();
            if state.queue.iter().all(|call| call.waited() < timeout) {
                return 0;
            }
            let queue = std::mem::take(&mut state.queue);
            for mut call in queue {
                if call.waited() < timeout {
                    state.queue.push_back(call);
                    continue;
                }
                outbound.push(self.expire_queued(call, timeout));
            }
        }
        let expired = outbound.len();
        self.deliver(outbound);
        expired
    }

    /// Stops admission and cancels every queued call.
    ///
    /// Cancelled calls are answered on connections that are still live. A
    /// call already executing is left to finish. Returns the number of calls
    /// cancelled.
    pub fn shutdown(&self) -> usize {
        let mut outbound = Vec::new();
        {
            let mut state = self.lock();
            state.closed = true;
            while let Some(mut call) = state.queue.pop_front() {
                self.settle(&mut call, CallState::Cancelled);
                let error = DispatchError::Cancelled {
                    method: call.method().to_owned(),
                    reason: CancelReason::ShuttingDown,
                };
                outbound.push(Outbound {
                    connection: call.connection,
                    response: CommandResponse::failure(call.request_id, error.to_error_object()),
                });
            }
        }
        let cancelled = outbound.len();
        info!(target: DISPATCH_TARGET, cancelled, "dispatcher shut down");
        self.deliver(outbound);
        cancelled
    }

    /// Returns true once [`Dispatcher::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.lock().closed
    }

    /// Binds the execution thread to the current thread.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionFault::AlreadyBound`] when another thread already
    /// holds the role.
    pub fn bind_execution_thread(&self) -> Result<(), ExecutionFault> {
        let current = thread::current().id();
        let bound = *self.shared.execution_thread.get_or_init(|| current);
        if bound != current {
            return Err(ExecutionFault::AlreadyBound { bound });
        }
        Ok(())
    }

    /// Snapshot of the dispatcher counters.
    pub fn stats(&self) -> DispatchStats {
        let state = self.lock();
        self.shared
            .counters
            .snapshot(state.queue.len(), state.in_flight.is_some())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Handlers never run under the lock, so poisoning cannot leave the
        // queue half-updated.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reject(&self, connection: ConnectionId, error: DispatchError) -> DispatchError {
        self.shared.counters.record_rejected();
        debug!(
            target: DISPATCH_TARGET,
            %connection,
            code = error.code().code(),
            error = %error,
            "request rejected"
        );
        error
    }

    fn settle(&self, call: &mut PendingCall, terminal: CallState) {
        if let Err(error) = call.advance(terminal) {
            warn!(target: DISPATCH_TARGET, %error, "call state machine violated");
        }
        self.shared.counters.record_terminal(call.state());
        debug!(
            target: DISPATCH_TARGET,
            call_id = %call.id,
            connection = %call.connection,
            method = call.method(),
            state = %call.state(),
            "call settled"
        );
    }

    fn expire_queued(&self, mut call: PendingCall, timeout: Duration) -> Outbound {
        self.settle(&mut call, CallState::TimedOut);
        warn!(
            target: DISPATCH_TARGET,
            call_id = %call.id,
            connection = %call.connection,
            method = call.method(),
            waited_ms = duration_ms(call.waited()),
            "call timed out in queue"
        );
        let error = DispatchError::Timeout {
            method: call.method().to_owned(),
            stage: TimeoutStage::Queued,
            budget: timeout,
        };
        Outbound {
            connection: call.connection,
            response: CommandResponse::failure(call.request_id, error.to_error_object()),
        }
    }

    /// Starts the head of the queue, first expiring any calls at the head
    /// that outlived the queue timeout while earlier calls ran.
    fn begin_next(
        &self,
        execution_thread: ThreadId,
        report: &mut PumpReport,
    ) -> Result<Option<Started>, ExecutionFault> {
        let mut expired = Vec::new();
        let next = self.claim_head(execution_thread, &mut expired);
        report.expired += expired.len();
        self.deliver(expired);
        next
    }

    fn claim_head(
        &self,
        execution_thread: ThreadId,
        expired: &mut Vec<Outbound>,
    ) -> Result<Option<Started>, ExecutionFault> {
        let timeout = self.shared.settings.queue_timeout;
        let mut state = self.lock();
        while state
            .queue
            .front()
            .is_some_and(|head| head.waited() >= timeout)
        {
            let Some(call) = state.queue.pop_front() else {
                break;
            };
            expired.push(self.expire_queued(call, timeout));
        }

        let Some(head) = state.queue.front() else {
            return Ok(None);
        };
        execution::check_affinity(&head.descriptor, execution_thread)?;

        let Some(mut call) = state.queue.pop_front() else {
            return Ok(None);
        };
        for next in [CallState::Dispatched, CallState::Executing] {
            if let Err(error) = call.advance(next) {
                warn!(target: DISPATCH_TARGET, %error, "call state machine violated");
            }
        }
        let started = Started {
            call: call.id,
            descriptor: Arc::clone(&call.descriptor),
            context: CallContext::new(
                call.method().to_owned(),
                call.request_id.clone(),
                self.shared.settings.execution_budget,
                Arc::clone(&call.cancel_requested),
            ),
            params: call.take_params(),
        };
        debug!(
            target: DISPATCH_TARGET,
            call_id = %call.id,
            connection = %call.connection,
            method = call.method(),
            waited_ms = duration_ms(call.waited()),
            state = %call.state(),
            "call executing"
        );
        state.in_flight = Some(call);
        Ok(Some(started))
    }

    fn finish(&self, id: CallId, context: &CallContext, outcome: Result<Value, DispatchError>) {
        let outbound = {
            let mut state = self.lock();
            let Some(mut call) = state.in_flight.take() else {
                warn!(target: DISPATCH_TARGET, call_id = %id, "in-flight slot empty at completion");
                return;
            };
            let terminal = match &outcome {
                Ok(_) => CallState::Completed,
                Err(DispatchError::Timeout { .. }) => CallState::TimedOut,
                Err(_) => CallState::Failed,
            };
            self.settle(&mut call, terminal);

            let budget = self.shared.settings.execution_budget;
            if outcome.is_ok() && context.elapsed() > budget {
                warn!(
                    target: DISPATCH_TARGET,
                    call_id = %call.id,
                    method = call.method(),
                    elapsed_ms = duration_ms(context.elapsed()),
                    budget_ms = duration_ms(budget),
                    "handler overran its execution budget without checkpointing"
                );
            }

            if call.is_cancel_requested() {
                debug!(
                    target: DISPATCH_TARGET,
                    call_id = %call.id,
                    connection = %call.connection,
                    "discarding result of cancelled call"
                );
                None
            } else {
                Some(Outbound {
                    connection: call.connection,
                    response: response_for(call.request_id, outcome),
                })
            }
        };
        self.deliver(outbound.into_iter().collect());
    }

    fn run_inline(
        &self,
        connection: ConnectionId,
        descriptor: Arc<HandlerDescriptor>,
        request_id: RequestId,
        params: Value,
    ) -> Result<Admission, DispatchError> {
        if self.is_shut_down() {
            return Err(self.reject(
                connection,
                DispatchError::Cancelled {
                    method: descriptor.method().to_owned(),
                    reason: CancelReason::ShuttingDown,
                },
            ));
        }
        self.shared.counters.record_enqueued();
        let context = CallContext::new(
            descriptor.method().to_owned(),
            request_id.clone(),
            self.shared.settings.execution_budget,
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = execution::run(&descriptor, &context, params);
        self.shared.counters.record_terminal(match &outcome {
            Ok(_) => CallState::Completed,
            Err(DispatchError::Timeout { .. }) => CallState::TimedOut,
            Err(_) => CallState::Failed,
        });
        debug!(
            target: DISPATCH_TARGET,
            %connection,
            method = descriptor.method(),
            ok = outcome.is_ok(),
            "call ran inline"
        );
        Ok(Admission::Completed(response_for(request_id, outcome)))
    }

    fn deliver(&self, outbound: Vec<Outbound>) {
        if outbound.is_empty() {
            return;
        }
        let routed: Vec<_> = {
            let state = self.lock();
            outbound
                .into_iter()
                .map(|message| {
                    let target = state
                        .connections
                        .get(&message.connection)
                        .and_then(Weak::upgrade);
                    (target, message)
                })
                .collect()
        };
        for (target, message) in routed {
            match target {
                Some(target) => target.deliver(message.response),
                None => debug!(
                    target: DISPATCH_TARGET,
                    connection = %message.connection,
                    "connection gone; response dropped"
                ),
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Dispatcher")
            .field("settings", &self.shared.settings)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn response_for(id: RequestId, outcome: Result<Value, DispatchError>) -> CommandResponse {
    match outcome {
        Ok(result) => CommandResponse::success(id, result),
        Err(error) => CommandResponse::failure(id, error.to_error_object()),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct PumpGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PumpGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PumpGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
