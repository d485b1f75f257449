//! BDD test world for bootstrap scenarios: loader, reporter, bridge and serving state.

use std::cell::RefCell;
use std::net::TcpListener;
use std::sync::Arc;

use conduit_config::{Config, SocketEndpoint};

use crate::bootstrap::{
    BootstrapError, Bridge, ConfigLoader, ServeError, Serving, StaticConfigLoader, bootstrap_with,
};
use crate::registry::RegistryBuilder;

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::reporter::RecordingHealthReporter;

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    socket_path: Option<String>,
    pub reporter: Arc<RecordingHealthReporter>,
    bridge: Option<Bridge>,
    bootstrap_error: Option<BootstrapError>,
    serving: Option<Serving>,
    serve_error: Option<ServeError>,
    reserved: Option<TcpListener>,
}

impl TestWorld {
    /// Builds a world with a successful configuration loader.
    #[must_use]
    pub fn new() -> Self {
        let mut world = Self {
            loader: Box::new(FailingConfigLoader),
            socket_path: None,
            reporter: Arc::new(RecordingHealthReporter::default()),
            bridge: None,
            bootstrap_error: None,
            serving: None,
            serve_error: None,
            reserved: None,
        };
        world.use_successful_loader();
        world
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
        self.socket_path = None;
        self.reset_results();
    }

    /// Installs a loader that succeeds with a Unix socket endpoint.
    pub fn use_successful_loader(&mut self) {
        let loader = TestConfigLoader::new();
        self.socket_path = Some(loader.socket_path());
        self.loader = Box::new(loader);
        self.reset_results();
    }

    /// Installs a loader whose TCP port is already taken.
    pub fn use_reserved_tcp_port(&mut self) {
        self.reset_results();
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind reserved port");
        let port = listener.local_addr().expect("local addr").port();
        self.loader = Box::new(StaticConfigLoader::new(Config {
            listen_socket: SocketEndpoint::tcp("127.0.0.1", port),
            ..Config::default()
        }));
        self.socket_path = None;
        self.reserved = Some(listener);
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.bridge.is_some() || self.bootstrap_error.is_some() {
            return;
        }

        match bootstrap_with(
            &*self.loader,
            self.reporter.clone(),
            RegistryBuilder::new().freeze(),
        ) {
            Ok(bridge) => {
                self.bridge = Some(bridge);
            }
            Err(error) => {
                self.bootstrap_error = Some(error);
            }
        }
    }

    /// Starts serving on the bootstrapped bridge.
    pub fn serve(&mut self) {
        let Some(bridge) = self.bridge.as_ref() else {
            return;
        };
        match bridge.serve() {
            Ok(serving) => self.serving = Some(serving),
            Err(error) => self.serve_error = Some(error),
        }
    }

    /// Returns whether bootstrap produced an error.
    #[must_use]
    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// Returns true when the bridge handle is available.
    #[must_use]
    pub fn bridge_started(&self) -> bool {
        self.bridge.is_some()
    }

    /// Returns the bridge handle, if bootstrap succeeded.
    #[must_use]
    pub fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    /// Returns true while the listener is running.
    #[must_use]
    pub fn serving(&self) -> bool {
        self.serving.is_some()
    }

    /// Returns the serve error, if serving failed.
    #[must_use]
    pub fn serve_error(&self) -> Option<&ServeError> {
        self.serve_error.as_ref()
    }

    /// Unix socket path configured by the successful loader.
    #[must_use]
    pub fn socket_path(&self) -> Option<&str> {
        self.socket_path.as_deref()
    }

    /// Stops serving and returns the number of calls cancelled.
    pub fn stop_serving(&mut self) -> Option<usize> {
        self.serving
            .take()
            .map(|serving| serving.shutdown().expect("listener shuts down cleanly"))
    }

    fn reset_results(&mut self) {
        self.stop_serving();
        self.bridge = None;
        self.bootstrap_error = None;
        self.serve_error = None;
        self.reserved = None;
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        if let Some(serving) = self.serving.take() {
            let _ = serving.shutdown();
        }
    }
}

/// Default test world fixture.
#[must_use]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
