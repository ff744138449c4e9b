//! Configuration system for Rekindle.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory (`config.toml`) and/or
//! `.rekindle/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::options::JobOptions;

/// Workspace-relative directory holding Rekindle's own files.
pub const WORKSPACE_DIR: &str = ".rekindle";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RekindleConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cancellation: CancellationConfig,
    /// Default hyperparameters and checkpoint policy for new jobs.
    #[serde(default)]
    pub training: JobOptions,
}

/// Where job directories live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root under which job directories are keyed. Relative paths resolve
    /// against the workspace.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// File extension of weight blobs written by the trainable unit.
    #[serde(default = "default_weights_extension")]
    pub weights_extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            weights_extension: default_weights_extension(),
        }
    }
}

/// Cooperative cancellation through a polled file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationConfig {
    #[serde(default = "default_cancel_path")]
    pub path: PathBuf,
    /// File content that requests a stop.
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
    /// Poll the file every N epochs (>= 1).
    #[serde(default = "default_poll_every_epochs")]
    pub poll_every_epochs: usize,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            path: default_cancel_path(),
            sentinel: default_sentinel(),
            poll_every_epochs: default_poll_every_epochs(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(WORKSPACE_DIR).join("jobs")
}

fn default_weights_extension() -> String {
    "bin".to_string()
}

fn default_cancel_path() -> PathBuf {
    PathBuf::from(WORKSPACE_DIR).join("cancel")
}

fn default_sentinel() -> String {
    "die".to_string()
}

fn default_poll_every_epochs() -> usize {
    1
}

impl RekindleConfig {
    /// Resolve relative storage and cancellation paths against `workspace`.
    pub fn rooted_at(mut self, workspace: &Path) -> Self {
        if self.storage.root.is_relative() {
            self.storage.root = workspace.join(&self.storage.root);
        }
        if self.cancellation.path.is_relative() {
            self.cancellation.path = workspace.join(&self.cancellation.path);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Invalid {
            message: message.to_string(),
        };
        if self.storage.weights_extension.trim().is_empty() {
            return Err(invalid("storage.weights_extension must not be empty"));
        }
        if self.cancellation.sentinel.trim().is_empty() {
            return Err(invalid("cancellation.sentinel must not be empty"));
        }
        if self.cancellation.poll_every_epochs == 0 {
            return Err(invalid("cancellation.poll_every_epochs must be >= 1"));
        }
        self.training
            .validate()
            .map_err(|e| invalid(&format!("training: {e}")))
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "rekindle", "rekindle")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `REKINDLE_`)
/// 3. Workspace-local config (`.rekindle/config.toml`)
/// 4. User config (`<config dir>/rekindle/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&RekindleConfig>,
) -> Result<RekindleConfig, Box<figment::Error>> {
    layered(workspace, None, overrides).extract().map_err(Box::new)
}

/// Like [`load_config`], with one more TOML file layered just below the
/// environment. A missing file is an error.
pub fn load_config_with_file(
    workspace: Option<&Path>,
    file: Option<&Path>,
) -> Result<RekindleConfig, Box<figment::Error>> {
    if let Some(file) = file {
        if !file.exists() {
            return Err(Box::new(figment::Error::from(format!(
                "config file not found: {}",
                file.display()
            ))));
        }
    }
    layered(workspace, file, None).extract().map_err(Box::new)
}

fn layered(
    workspace: Option<&Path>,
    file: Option<&Path>,
    overrides: Option<&RekindleConfig>,
) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(RekindleConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(file) = file {
        figment = figment.merge(Toml::file(file));
    }

    // REKINDLE_TRAINING__PATIENCE, REKINDLE_STORAGE__ROOT, ...
    figment = figment.merge(Env::prefixed("REKINDLE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment
}

/// Write the built-in defaults to `.rekindle/config.toml` unless a file is
/// already there. Returns the config path.
pub fn write_default_config(workspace: &Path) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Ok(path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(&RekindleConfig::default())?;
    std::fs::write(&path, rendered)?;
    tracing::info!(path = %path.display(), "Wrote default configuration");
    Ok(path)
}
