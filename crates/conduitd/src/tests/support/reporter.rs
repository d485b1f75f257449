//! Health reporter double that keeps every event for later assertions.

use std::sync::Mutex;

use conduit_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::dispatch::ExecutionFault;
use crate::health::HealthReporter;
use crate::transport::ListenerError;

/// Lifecycle events, with errors and endpoints rendered as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ListenerStarted(String),
    ListenerFailed(String),
    ServingStopped { endpoint: String, cancelled: usize },
    ExecutionFault(String),
}

#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Snapshot of the events recorded so far, oldest first.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.lock().clone()
    }

    /// Whether any recorded event satisfies `predicate`.
    pub fn recorded(&self, predicate: impl Fn(&HealthEvent) -> bool) -> bool {
        self.lock().iter().any(predicate)
    }

    fn push(&self, event: HealthEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<HealthEvent>> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.push(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.push(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.push(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_started(&self, endpoint: &SocketEndpoint) {
        self.push(HealthEvent::ListenerStarted(endpoint.to_string()));
    }

    fn listener_failed(&self, error: &ListenerError) {
        self.push(HealthEvent::ListenerFailed(error.to_string()));
    }

    fn serving_stopped(&self, endpoint: &SocketEndpoint, cancelled: usize) {
        self.push(HealthEvent::ServingStopped {
            endpoint: endpoint.to_string(),
            cancelled,
        });
    }

    fn execution_fault(&self, fault: &ExecutionFault) {
        self.push(HealthEvent::ExecutionFault(fault.to_string()));
    }
}
