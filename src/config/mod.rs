//! Configuration file handling
//!
//! Settings live in a single TOML file, `cachegraph/config.toml` under the
//! platform config dir. `--config` or `CACHEGRAPH_CONFIG` point elsewhere.
//! A missing file means all defaults; `cachegraph config init` writes one.

pub mod schema;

pub use schema::Config;

use crate::error::{CacheGraphError, CacheGraphResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Reads and writes the cachegraph config file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for the per-user config file
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Manager for an explicit config file, as given by `--config`
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// `<config dir>/cachegraph/config.toml`, relative to `.` when the
    /// platform has no config dir
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cachegraph")
            .join("config.toml")
    }

    /// Export and manager settings; defaults when the file does not exist
    pub async fn load(&self) -> CacheGraphResult<Config> {
        if !self.config_path.exists() {
            debug!(
                "No config at {}, using export defaults",
                self.config_path.display()
            );
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Parse `path`; unknown keys are ignored and missing ones defaulted
    pub async fn load_from_file(&self, path: &Path) -> CacheGraphResult<Config> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            CacheGraphError::io(format!("reading config from {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| CacheGraphError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write `config`, creating the cachegraph config dir if needed
    pub async fn save(&self, config: &Config) -> CacheGraphResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheGraphError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            CacheGraphError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!(
            "Wrote cachegraph config (export mode {}) to {}",
            config.export.mode,
            self.config_path.display()
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
