//! Cooperative cancellation through a polled file.
//!
//! An operator (or the `rekindle cancel` command) writes the sentinel into the
//! file; the orchestrator checks it at epoch boundaries and stops with the job
//! still `Training`, so the next `train()` resumes from the latest lineage.

use std::path::{Path, PathBuf};

use crate::config::CancellationConfig;
use crate::error::Result;
use crate::persistence::atomic_write;

#[derive(Debug, Clone, PartialEq)]
pub struct CancellationFile {
    path: PathBuf,
    sentinel: String,
    poll_every_epochs: usize,
}

impl CancellationFile {
    pub fn new(path: impl Into<PathBuf>, sentinel: impl Into<String>, poll_every_epochs: usize) -> Self {
        Self {
            path: path.into(),
            sentinel: sentinel.into(),
            poll_every_epochs: poll_every_epochs.max(1),
        }
    }

    pub fn from_config(config: &CancellationConfig) -> Self {
        Self::new(&config.path, &config.sentinel, config.poll_every_epochs)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Reset the file to empty, creating it if needed.
    pub fn clear(&self) -> Result<()> {
        atomic_write(&self.path, b"")?;
        Ok(())
    }

    /// Ask every running job polling this file to stop.
    pub fn request(&self) -> Result<()> {
        atomic_write(&self.path, self.sentinel.as_bytes())?;
        tracing::info!(path = %self.path.display(), "Cancellation requested");
        Ok(())
    }

    /// Whether the file should be polled after this many epochs of the current call.
    pub fn should_poll(&self, epochs_since_start: usize) -> bool {
        epochs_since_start % self.poll_every_epochs == 0
    }

    /// Whether the file currently holds the sentinel. Unreadable means no.
    pub fn is_requested(&self) -> bool {
        std::fs::read_to_string(&self.path)
            .map(|content| content.trim() == self.sentinel)
            .unwrap_or(false)
    }
}
