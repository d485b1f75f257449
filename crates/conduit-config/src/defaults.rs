use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP host the bridge listens on. Clients are trusted and local.
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";

/// Default TCP port the bridge listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 9316;

/// Default log filter expression used by the bridge.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Maximum time a call may wait in the queue before it times out.
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 30_000;

/// Cooperative run budget granted to a handler once it starts executing.
pub const DEFAULT_EXECUTION_BUDGET_MS: u64 = 10_000;

/// Admission bound on the global pending-call queue.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1024;

/// Maximum size of one request frame in bytes.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Cadence of the host execution loop (roughly one editor frame).
pub const DEFAULT_PUMP_INTERVAL_MS: u64 = 16;

/// Cadence of the background queue-timeout reaper.
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 100;

/// Default log filter expression used by the bridge.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default listen endpoint for the bridge.
pub fn default_listen_socket() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT)
}

pub(crate) fn default_queue_timeout_ms() -> u64 {
    DEFAULT_QUEUE_TIMEOUT_MS
}

pub(crate) fn default_execution_budget_ms() -> u64 {
    DEFAULT_EXECUTION_BUDGET_MS
}

pub(crate) fn default_max_queue_depth() -> usize {
    DEFAULT_MAX_QUEUE_DEPTH
}

pub(crate) fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

pub(crate) fn default_pump_interval_ms() -> u64 {
    DEFAULT_PUMP_INTERVAL_MS
}

pub(crate) fn default_reap_interval_ms() -> u64 {
    DEFAULT_REAP_INTERVAL_MS
}

pub(crate) fn default_true() -> bool {
    true
}
