//! Process-wide `tracing` subscriber for the bridge.
//!
//! Events go to stderr as JSON or compact lines with RFC 3339 UTC times.
//! Thread names are always recorded: affinity faults are diagnosed from
//! them.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

use conduit_config::{Config, LogFormat};

static INSTALLED_FORMAT: OnceCell<LogFormat> = OnceCell::new();

/// Proof that the global subscriber is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Format of the installed subscriber. Once installed it wins over any
    /// later configuration.
    #[must_use]
    pub fn format(self) -> LogFormat {
        self.format
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the global subscriber the first time it is called.
///
/// Later calls return the existing handle without parsing their filter.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED_FORMAT
        .get_or_try_init(|| {
            install(config.log_filter(), config.log_format())?;
            Ok(config.log_format())
        })
        .map(|format| TelemetryHandle { format: *format })
}

fn parse_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(expression).map_err(|error| TelemetryError::Filter(error.to_string()))
}

fn install(filter: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(parse_filter(filter)?)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());

    let installed = match format {
        LogFormat::Json => set_global_default(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => set_global_default(builder.compact().finish()),
    };
    installed.map_err(TelemetryError::Subscriber)
}
