//! Filesystem and socket locations
//!
//! Defaults follow the XDG layout; each location can be overridden through
//! the environment or explicitly by the binary's command-line flags.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::constants::paths::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Root of the persistent store
    pub data_dir: PathBuf,
    /// Unix socket the worker listens on
    pub socket_path: PathBuf,
}

impl AppPaths {
    /// Resolve paths from the environment, falling back to platform defaults
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var_os(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };
        let socket_path = match std::env::var_os(ENV_SOCKET) {
            Some(path) => PathBuf::from(path),
            None => default_socket_path()?,
        };
        Ok(Self { data_dir, socket_path })
    }

    /// Apply explicit overrides on top of the environment-derived paths
    pub fn with_overrides(mut self, data_dir: Option<PathBuf>, socket_path: Option<PathBuf>) -> Self {
        if let Some(dir) = data_dir {
            info!(path = %dir.display(), "Using data directory override");
            self.data_dir = dir;
        }
        if let Some(path) = socket_path {
            info!(path = %path.display(), "Using socket path override");
            self.socket_path = path;
        }
        self
    }

    /// Directory holding the worker's generated native config
    pub fn run_dir(&self) -> PathBuf {
        self.data_dir.join(RUN_DIR)
    }

    pub fn native_config_path(&self) -> PathBuf {
        self.run_dir().join(NATIVE_CONFIG_FILE)
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Failed to determine data directory (no HOME?)")?;
    Ok(base.join(APP_DIR))
}

/// Get default socket path (XDG_RUNTIME_DIR with fallback to cache)
pub fn default_socket_path() -> Result<PathBuf> {
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILE));
    }

    // Fallback to cache dir
    let cache = dirs::cache_dir()
        .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(APP_DIR).join(SOCKET_FILE))
}
