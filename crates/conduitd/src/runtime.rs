//! Host-side drivers for the dispatcher.
//!
//! [`ExecutionLoop`] stands in for the editor tick: it pumps the dispatcher
//! on the thread that owns editor state. [`Reaper`] expires queued calls from
//! a background thread so waiting clients hear back even while a long
//! handler holds the execution thread.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, ExecutionFault, PumpReport};
use crate::health::HealthReporter;

const RUNTIME_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::runtime");

/// Totals accumulated by an [`ExecutionLoop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Pumps attempted.
    pub ticks: u64,
    /// Handlers run to completion.
    pub executed: usize,
    /// Queued calls expired by the loop's own pumps.
    pub expired: usize,
    /// Pumps that returned an [`ExecutionFault`].
    pub faults: usize,
}

impl LoopSummary {
    fn record(&mut self, report: PumpReport) {
        self.executed += report.executed;
        self.expired += report.expired;
    }
}

/// Pumps a dispatcher at a fixed cadence on the calling thread.
pub struct ExecutionLoop {
    dispatcher: Dispatcher,
    interval: Duration,
    reporter: Arc<dyn HealthReporter>,
}

impl ExecutionLoop {
    /// Builds a loop over `dispatcher` ticking every `interval`.
    pub fn new(
        dispatcher: Dispatcher,
        interval: Duration,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            dispatcher,
            interval,
            reporter,
        }
    }

    /// Runs one pump, reporting any fault.
    pub fn tick(&self, summary: &mut LoopSummary) {
        summary.ticks += 1;
        match self.dispatcher.pump() {
            Ok(report) => summary.record(report),
            Err(fault) => {
                summary.faults += 1;
                self.reporter.execution_fault(&fault);
            }
        }
    }

    /// Pumps until `stop` is raised.
    ///
    /// The calling thread becomes the execution thread for the lifetime of
    /// the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionFault::AlreadyBound`] when another thread already
    /// owns execution.
    pub fn run(&self, stop: &AtomicBool) -> Result<LoopSummary, ExecutionFault> {
        if let Err(fault) = self.dispatcher.bind_execution_thread() {
            self.reporter.execution_fault(&fault);
            return Err(fault);
        }
        info!(
            target: RUNTIME_TARGET,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "execution loop started"
        );

        let mut summary = LoopSummary::default();
        while !stop.load(Ordering::SeqCst) {
            self.tick(&mut summary);
            thread::sleep(self.interval);
        }

        info!(
            target: RUNTIME_TARGET,
            ticks = summary.ticks,
            executed = summary.executed,
            expired = summary.expired,
            faults = summary.faults,
            "execution loop stopped"
        );
        Ok(summary)
    }
}

/// Background thread expiring queued calls at a fixed cadence.
pub struct Reaper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Starts the reaper thread.
    ///
    /// # Errors
    ///
    /// Returns the spawn error when the thread cannot be created.
    pub fn spawn(dispatcher: Dispatcher, interval: Duration) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("conduit-reaper".to_owned())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    let expired = dispatcher.reap_expired();
                    if expired > 0 {
                        debug!(target: RUNTIME_TARGET, expired, "reaped queued calls");
                    }
                    thread::park_timeout(interval);
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the reaper and waits for it to exit.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!(target: RUNTIME_TARGET, "reaper thread panicked");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use conduit_config::{Config, SocketEndpoint};
    use rstest::rstest;
    use serde_json::{Value, json};

    use super::*;
    use crate::bootstrap::BootstrapError;
    use crate::connection::{ConnectionAdapter, MockResponseSink};
    use crate::dispatch::{CallContext, DispatcherSettings};
    use crate::protocol::Codec;
    use crate::registry::{HandlerDescriptor, RegistryBuilder};
    use crate::transport::ListenerError;

    #[derive(Default)]
    struct FaultCounter {
        faults: Mutex<Vec<String>>,
    }

    impl HealthReporter for FaultCounter {
        fn bootstrap_starting(&self) {}
        fn bootstrap_succeeded(&self, _config: &Config) {}
        fn bootstrap_failed(&self, _error: &BootstrapError) {}
        fn listener_started(&self, _endpoint: &SocketEndpoint) {}
        fn listener_failed(&self, _error: &ListenerError) {}
        fn serving_stopped(&self, _endpoint: &SocketEndpoint, _cancelled: usize) {}
        fn execution_fault(&self, fault: &ExecutionFault) {
            self.faults
                .lock()
                .expect("fault lock")
                .push(fault.to_string());
        }
    }

    fn dispatcher(queue_timeout: Duration) -> Dispatcher {
        let mut builder = RegistryBuilder::new();
        builder
            .register(HandlerDescriptor::new(
                "editor.noop",
                |_context: &CallContext, _params: Value| Ok(json!({})),
            ))
            .expect("register editor.noop");
        let settings = DispatcherSettings {
            queue_timeout,
            ..DispatcherSettings::default()
        };
        Dispatcher::new(builder.freeze(), settings)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[rstest]
    fn loop_runs_until_stopped() {
        let dispatcher = dispatcher(Duration::from_secs(30));
        let reporter = Arc::new(FaultCounter::default());
        let stop = Arc::new(AtomicBool::new(false));

        let mut sink = MockResponseSink::new();
        sink.expect_send().times(1).return_const(true);
        sink.expect_close().return_const(());
        let adapter = ConnectionAdapter::open(dispatcher.clone(), Codec::default(), Box::new(sink));
        adapter.on_request_bytes(br#"{"id":1,"method":"editor.noop"}"#);

        let runner = {
            let dispatcher = dispatcher.clone();
            let reporter: Arc<dyn HealthReporter> = reporter.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                ExecutionLoop::new(dispatcher, Duration::from_millis(1), reporter).run(&stop)
            })
        };

        assert!(wait_until(|| dispatcher.stats().completed == 1));
        stop.store(true, Ordering::SeqCst);
        let summary = runner
            .join()
            .expect("loop thread")
            .expect("loop should bind");
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.faults, 0);
        assert!(summary.ticks >= 1);
        adapter.on_close();
    }

    #[rstest]
    fn loop_refuses_a_second_execution_thread() {
        let dispatcher = dispatcher(Duration::from_secs(30));
        dispatcher.bind_execution_thread().expect("bind here");
        let reporter = Arc::new(FaultCounter::default());
        let shared: Arc<dyn HealthReporter> = reporter.clone();

        let outcome = thread::spawn(move || {
            let stop = AtomicBool::new(false);
            ExecutionLoop::new(dispatcher, Duration::from_millis(1), shared).run(&stop)
        })
        .join()
        .expect("loop thread");

        assert!(matches!(outcome, Err(ExecutionFault::AlreadyBound { .. })));
        assert_eq!(reporter.faults.lock().expect("fault lock").len(), 1);
    }

    #[rstest]
    fn reaper_expires_queued_calls() {
        let dispatcher = dispatcher(Duration::from_millis(20));

        let mut sink = MockResponseSink::new();
        sink.expect_send().times(1).returning(|frame| {
            let value: Value = serde_json::from_slice(&frame).expect("json frame");
            assert_eq!(value["error"]["code"], -32001);
            true
        });
        sink.expect_close().return_const(());
        let adapter = ConnectionAdapter::open(dispatcher.clone(), Codec::default(), Box::new(sink));
        adapter.on_request_bytes(br#"{"id":7,"method":"editor.noop"}"#);

        let reaper = Reaper::spawn(dispatcher.clone(), Duration::from_millis(5)).expect("spawn");
        assert!(wait_until(|| dispatcher.stats().timed_out == 1));
        reaper.stop();
        adapter.on_close();
    }
}
