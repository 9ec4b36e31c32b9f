//! Environment-driven server configuration.

use std::env;
use std::path::PathBuf;

use mirror::MirrorConfig;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mirror: MirrorConfig,
    pub addr: String,
}

impl ServerConfig {
    /// Reads configuration from the environment.
    ///
    /// `MIRROR_ROOT` is the directory to watch (default `./watched`),
    /// `MIRROR_LEDGER_DIR` holds the history files (default
    /// `./mirror-data`, deliberately outside the watched root so
    /// ledger writes never feed back into the watcher), and
    /// `MIRROR_ADDR` is the listen address.
    pub fn from_env() -> Self {
        let root = env::var_os("MIRROR_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("watched"));
        let ledger_dir = env::var_os("MIRROR_LEDGER_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("mirror-data"));
        let addr = env::var("MIRROR_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        Self {
            mirror: MirrorConfig::new(root, ledger_dir),
            addr,
        }
    }
}
