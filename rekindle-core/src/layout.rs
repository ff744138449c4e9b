//! Filesystem layout of a job directory.
//!
//! ```text
//! <root>/{architecture}-{dataset}-{loss}-{optimizer}/{epoch_budget}-{patience}/{fold}/
//!     status.txt
//!     log.csv
//!     predictions.txt
//!     latest/   weights.<ext> mcp.json lr.json epoch.json
//!     best/     weights.<ext> mcp.json lr.json epoch.json
//! ```

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::snapshot::Lineage;

/// Identity of one job: the configuration combination plus fold index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub architecture: String,
    pub dataset: String,
    pub loss: String,
    pub optimizer: String,
    pub epoch_budget: usize,
    pub patience: usize,
    pub fold: usize,
}

impl JobKey {
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}-{}-{}-{}",
            self.architecture, self.dataset, self.loss, self.optimizer
        ))
        .join(format!("{}-{}", self.epoch_budget, self.patience))
        .join(self.fold.to_string())
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}/{}-{}/{}",
            self.architecture,
            self.dataset,
            self.loss,
            self.optimizer,
            self.epoch_budget,
            self.patience,
            self.fold
        )
    }
}

#[derive(Debug, Clone)]
pub struct JobLayout {
    dir: PathBuf,
}

impl JobLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_key(root: &Path, key: &JobKey) -> Self {
        Self::new(root.join(key.relative_dir()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join("status.txt")
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join("log.csv")
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.dir.join("predictions.txt")
    }

    pub fn lineage_dir(&self, lineage: Lineage) -> PathBuf {
        self.dir.join(lineage.as_str())
    }

    /// Remove the job's artifacts.
    ///
    /// With `keep_history`, the committed lineages survive and only the status,
    /// logs, predictions, and any interrupted-commit leftovers are removed.
    pub fn delete(&self, keep_history: bool) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        if !keep_history {
            std::fs::remove_dir_all(&self.dir)?;
            tracing::info!(dir = %self.dir.display(), "Deleted job directory");
            return Ok(());
        }

        for file in [self.status_path(), self.log_path(), self.predictions_path()] {
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }
        for lineage in Lineage::ALL {
            for leftover in [
                crate::snapshot::staging_dir(&self.dir, lineage),
                crate::snapshot::previous_dir(&self.dir, lineage),
            ] {
                if leftover.exists() {
                    std::fs::remove_dir_all(&leftover)?;
                }
            }
        }
        tracing::info!(dir = %self.dir.display(), "Deleted job status and logs, kept lineages");
        Ok(())
    }
}
