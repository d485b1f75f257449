//! Lifecycle health events for the bridge.
//!
//! Bootstrap, serving and the execution loop report through
//! [`HealthReporter`] rather than logging directly, so hosts can forward
//! lifecycle changes to an editor status bar and tests can observe them.

use conduit_config::{Config, SocketEndpoint};
use tracing::{error, info};

use crate::bootstrap::BootstrapError;
use crate::dispatch::ExecutionFault;
use crate::transport::ListenerError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer of bridge lifecycle events.
pub trait HealthReporter: Send + Sync {
    fn bootstrap_starting(&self);

    fn bootstrap_succeeded(&self, config: &Config);

    fn bootstrap_failed(&self, error: &BootstrapError);

    /// The listener is bound and accepting connections.
    fn listener_started(&self, endpoint: &SocketEndpoint);

    /// The listener could not be bound or started.
    fn listener_failed(&self, error: &ListenerError);

    /// Serving ended; `cancelled` queued calls were answered with
    /// `Cancelled`.
    fn serving_stopped(&self, endpoint: &SocketEndpoint, cancelled: usize);

    /// A pump hit a process-level fault, such as running on a thread other
    /// than the bound execution thread.
    fn execution_fault(&self, fault: &ExecutionFault);
}

/// Reporter that writes each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        info!(target: HEALTH_TARGET, event = "bootstrap_starting", "starting bridge bootstrap");
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.listen_socket(),
            log_format = %config.log_format(),
            queue_timeout_ms = config.queue_timeout_ms,
            execution_budget_ms = config.execution_budget_ms,
            max_queue_depth = config.max_queue_depth(),
            max_calls_per_pump = config.max_calls_per_pump,
            inline_any_thread = config.inline_any_thread(),
            "bridge bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, failure: &BootstrapError) {
        error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %failure,
            "bridge bootstrap failed"
        );
    }

    fn listener_started(&self, endpoint: &SocketEndpoint) {
        info!(
            target: HEALTH_TARGET,
            event = "listener_started",
            socket = %endpoint,
            "accepting bridge connections"
        );
    }

    fn listener_failed(&self, failure: &ListenerError) {
        error!(
            target: HEALTH_TARGET,
            event = "listener_failed",
            error = %failure,
            "bridge listener failed"
        );
    }

    fn serving_stopped(&self, endpoint: &SocketEndpoint, cancelled: usize) {
        info!(
            target: HEALTH_TARGET,
            event = "serving_stopped",
            socket = %endpoint,
            cancelled,
            "bridge stopped serving"
        );
    }

    fn execution_fault(&self, fault: &ExecutionFault) {
        error!(
            target: HEALTH_TARGET,
            event = "execution_fault",
            fault = %fault,
            "execution loop fault"
        );
    }
}
