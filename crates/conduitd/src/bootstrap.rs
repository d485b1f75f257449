//! Bridge bootstrap orchestration.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;
use tracing::warn;

use conduit_config::{Config, SocketEndpoint, SocketPreparationError};

use crate::dispatch::{Dispatcher, DispatcherSettings};
use crate::health::HealthReporter;
use crate::protocol::Codec;
use crate::registry::CommandRegistry;
use crate::runtime::{ExecutionLoop, Reaper};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{BridgeConnectionHandler, ListenerError, ListenerHandle, SocketListener};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the bridge configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare listen socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
}

/// Errors surfaced while starting to serve connections.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listener could not be bound or started.
    #[error("failed to start listener: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// The queue reaper thread could not be spawned.
    #[error("failed to start queue reaper: {source}")]
    Reaper {
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
}

/// A bootstrapped bridge, ready to serve.
pub struct Bridge {
    config: Config,
    dispatcher: Dispatcher,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Bridge {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the scheduler.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Builds the execution loop the host drives on its editor thread.
    #[must_use]
    pub fn execution_loop(&self) -> ExecutionLoop {
        ExecutionLoop::new(
            self.dispatcher.clone(),
            self.config.pump_interval(),
            Arc::clone(&self.reporter),
        )
    }

    /// Binds the listen socket and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] when the listener or the reaper cannot start.
    /// Both failures are reported through the health reporter.
    pub fn serve(&self) -> Result<Serving, ServeError> {
        let endpoint = self.config.listen_socket();
        if !endpoint.is_local() {
            warn!(
                target: BOOTSTRAP_TARGET,
                %endpoint,
                "bridge is reachable from other hosts; clients are not authenticated"
            );
        }
        let started = SocketListener::bind(endpoint).and_then(|listener| {
            let local_addr = listener.local_addr();
            let handler = Arc::new(BridgeConnectionHandler::new(
                self.dispatcher.clone(),
                Codec::new(self.config.allow_batches()),
                self.config.max_request_bytes(),
            ));
            listener
                .start(handler)
                .map(|handle| (handle, local_addr))
        });
        let (listener, local_addr) = match started {
            Ok(started) => started,
            Err(source) => {
                self.reporter.listener_failed(&source);
                return Err(ServeError::Listener { source });
            }
        };

        let reaper = match Reaper::spawn(self.dispatcher.clone(), self.config.reap_interval()) {
            Ok(reaper) => reaper,
            Err(source) => {
                listener.shutdown();
                return Err(ServeError::Reaper { source });
            }
        };

        self.reporter.listener_started(endpoint);
        Ok(Serving {
            dispatcher: self.dispatcher.clone(),
            endpoint: endpoint.clone(),
            reporter: Arc::clone(&self.reporter),
            listener,
            reaper,
            local_addr,
        })
    }
}

/// A running listener and queue reaper.
pub struct Serving {
    dispatcher: Dispatcher,
    endpoint: SocketEndpoint,
    reporter: Arc<dyn HealthReporter>,
    listener: ListenerHandle,
    reaper: Reaper,
    local_addr: Option<SocketAddr>,
}

impl Serving {
    /// Bound TCP address; `None` for Unix sockets.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops accepting connections and cancels every queued call.
    ///
    /// Returns the number of queued calls cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the accept loop panicked.
    pub fn shutdown(self) -> Result<usize, ListenerError> {
        let Self {
            dispatcher,
            endpoint,
            reporter,
            listener,
            reaper,
            ..
        } = self;
        listener.shutdown();
        let cancelled = dispatcher.shutdown();
        reaper.stop();
        listener.join()?;
        reporter.serving_stopped(&endpoint, cancelled);
        Ok(cancelled)
    }
}

/// Bootstraps the bridge using the supplied collaborators.
///
/// The registry is frozen before any connection can be accepted.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    registry: CommandRegistry,
) -> Result<Bridge, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    if let Err(source) = config.listen_socket().prepare_filesystem() {
        let error = BootstrapError::Socket { source };
        reporter.bootstrap_failed(&error);
        return Err(error);
    }

    let dispatcher = Dispatcher::new(registry, DispatcherSettings::from(&config));
    reporter.bootstrap_succeeded(&config);

    Ok(Bridge {
        config,
        dispatcher,
        telemetry,
        reporter,
    })
}
