//! Shared configuration for the conduit command bridge.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then the
//! TOML file named by `--config-path` / `CONDUIT_CONFIG_PATH`, then
//! `CONDUIT_*` environment variables, then command-line flags. The resolved
//! [`Config`] describes where the bridge listens, how it logs, and the
//! scheduling policy applied by the dispatcher.

mod defaults;
mod logging;
mod socket;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_EXECUTION_BUDGET_MS, DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_MAX_REQUEST_BYTES, DEFAULT_PUMP_INTERVAL_MS,
    DEFAULT_QUEUE_TIMEOUT_MS, DEFAULT_REAP_INTERVAL_MS, default_listen_socket, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CONDUIT")]
pub struct Config {
    /// Endpoint clients connect to.
    #[ortho_config(default = defaults::default_listen_socket())]
    #[serde(default = "defaults::default_listen_socket")]
    pub listen_socket: SocketEndpoint,
    /// `tracing` filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Log line format.
    #[ortho_config(default = defaults::default_log_format())]
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
    /// Maximum wait, in milliseconds, for a call that has not started.
    #[ortho_config(default = defaults::DEFAULT_QUEUE_TIMEOUT_MS)]
    #[serde(default = "defaults::default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    /// Cooperative run budget, in milliseconds, for an executing call.
    #[ortho_config(default = defaults::DEFAULT_EXECUTION_BUDGET_MS)]
    #[serde(default = "defaults::default_execution_budget_ms")]
    pub execution_budget_ms: u64,
    /// Maximum number of queued calls before new calls are refused.
    #[ortho_config(default = defaults::DEFAULT_MAX_QUEUE_DEPTH)]
    #[serde(default = "defaults::default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Maximum calls executed by a single pump; zero drains the queue.
    #[ortho_config(default = 0)]
    #[serde(default)]
    pub max_calls_per_pump: usize,
    /// Maximum size of one request frame in bytes.
    #[ortho_config(default = defaults::DEFAULT_MAX_REQUEST_BYTES)]
    #[serde(default = "defaults::default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// Accept JSON arrays carrying several requests in one frame.
    #[ortho_config(default = true)]
    #[serde(default = "defaults::default_true")]
    pub allow_batches: bool,
    /// Run `AnyThread` handlers on the receiving I/O thread.
    #[ortho_config(default = false)]
    #[serde(default)]
    pub inline_any_thread: bool,
    /// Host execution loop cadence in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_PUMP_INTERVAL_MS)]
    #[serde(default = "defaults::default_pump_interval_ms")]
    pub pump_interval_ms: u64,
    /// Queue-timeout reaper cadence in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_REAP_INTERVAL_MS)]
    #[serde(default = "defaults::default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_socket: default_listen_socket(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            queue_timeout_ms: DEFAULT_QUEUE_TIMEOUT_MS,
            execution_budget_ms: DEFAULT_EXECUTION_BUDGET_MS,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            max_calls_per_pump: 0,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            allow_batches: true,
            inline_any_thread: false,
            pump_interval_ms: DEFAULT_PUMP_INTERVAL_MS,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Loads the layered configuration for the current process arguments.
    ///
    /// # Errors
    ///
    /// Returns every file, environment and flag error found while merging
    /// the layers.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads the layered configuration from an explicit argument list whose
    /// first item is the program name.
    ///
    /// # Errors
    ///
    /// Returns every file, environment and flag error found while merging
    /// the layers.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Endpoint clients connect to.
    #[must_use]
    pub fn listen_socket(&self) -> &SocketEndpoint {
        &self.listen_socket
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log line format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Maximum wait for a call that has not started executing.
    #[must_use]
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// Cooperative run budget for an executing call.
    #[must_use]
    pub fn execution_budget(&self) -> Duration {
        Duration::from_millis(self.execution_budget_ms)
    }

    /// Maximum number of queued calls.
    #[must_use]
    pub fn max_queue_depth(&self) -> usize {
        self.max_queue_depth
    }

    /// Maximum calls per pump, or `None` when a pump drains the queue.
    #[must_use]
    pub fn max_calls_per_pump(&self) -> Option<usize> {
        (self.max_calls_per_pump > 0).then_some(self.max_calls_per_pump)
    }

    /// Maximum request frame size in bytes.
    #[must_use]
    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// Whether batched frames are accepted.
    #[must_use]
    pub fn allow_batches(&self) -> bool {
        self.allow_batches
    }

    /// Whether `AnyThread` handlers run on the receiving I/O thread.
    #[must_use]
    pub fn inline_any_thread(&self) -> bool {
        self.inline_any_thread
    }

    /// Host execution loop cadence.
    #[must_use]
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }

    /// Queue-timeout reaper cadence.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}
