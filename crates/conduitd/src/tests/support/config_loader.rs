//! Configuration loaders for bootstrap scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::OrthoError;
use tempfile::TempDir;

use conduit_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Serves on a Unix socket in a not-yet-created `run/` directory under a
/// scratch directory, so bootstrap has to prepare it.
pub struct TestConfigLoader {
    scratch: TempDir,
}

impl TestConfigLoader {
    pub fn new() -> Self {
        Self {
            scratch: TempDir::new().expect("scratch directory for the socket"),
        }
    }

    pub fn socket_path(&self) -> String {
        let run = self.scratch.path().join("run").join("conduitd.sock");
        Utf8PathBuf::from_path_buf(run)
            .expect("scratch directory is valid UTF-8")
            .into_string()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            listen_socket: SocketEndpoint::unix(self.socket_path()),
            ..Config::default()
        })
    }
}

/// Goes through real argument parsing with an endpoint scheme the bridge
/// does not speak.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter(["conduitd", "--listen-socket", "pipe://bridge"])
    }
}
