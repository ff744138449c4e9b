//! K-fold cross-validation over one architecture/dataset combination.
//!
//! Folds run sequentially in index order. The first fold that does not finish
//! `Complete` stops the runner, so a resource error on fold 1 never lets fold 2
//! start on a poisoned runtime.

use serde::Serialize;
use std::sync::Arc;

use crate::config::RekindleConfig;
use crate::error::{Error, Result};
use crate::job::JobOrchestrator;
use crate::metrics::Metrics;
use crate::options::JobOptions;
use crate::status::JobStatus;
use crate::unit::{Architecture, DataSet, Phase};

/// Per-fold evaluation plus the mean over metrics every fold reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationReport {
    pub folds: Vec<Metrics>,
    pub mean: Metrics,
}

#[derive(Debug)]
pub struct CrossValidationRunner {
    folds: Vec<JobOrchestrator>,
}

impl CrossValidationRunner {
    /// One orchestrator per dataset split.
    pub fn new(
        architecture: Arc<dyn Architecture>,
        dataset: Arc<dyn DataSet>,
        options: JobOptions,
        config: &RekindleConfig,
    ) -> Result<Self> {
        let splits = dataset.splits();
        if splits == 0 {
            return Err(Error::bad_settings(format!(
                "dataset '{}' has no splits",
                dataset.name()
            )));
        }
        let folds = (0..splits)
            .map(|fold| {
                JobOrchestrator::new(
                    architecture.clone(),
                    dataset.clone(),
                    options.clone(),
                    fold,
                    config,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { folds })
    }

    pub fn from_folds(folds: Vec<JobOrchestrator>) -> Result<Self> {
        if folds.is_empty() {
            return Err(Error::bad_settings("cross-validation needs at least one fold"));
        }
        Ok(Self { folds })
    }

    pub fn folds(&self) -> &[JobOrchestrator] {
        &self.folds
    }

    /// Train folds in order, stopping at the first that does not complete.
    pub fn train(&self) -> Result<JobStatus> {
        for fold in &self.folds {
            let status = fold.train()?;
            if status != JobStatus::Complete {
                tracing::warn!(job = %fold.key(), %status, "Fold did not complete, stopping");
                return Ok(status);
            }
        }
        tracing::info!(folds = self.folds.len(), "All folds complete");
        Ok(JobStatus::Complete)
    }

    /// Status of the first non-complete fold, or `Complete`.
    pub fn status(&self) -> JobStatus {
        self.folds
            .iter()
            .map(JobOrchestrator::status)
            .find(|status| *status != JobStatus::Complete)
            .unwrap_or(JobStatus::Complete)
    }

    pub fn is_complete(&self) -> bool {
        self.status() == JobStatus::Complete
    }

    pub fn evaluate(&self, phase: Phase) -> Result<CrossValidationReport> {
        if let Some(fold) = self.folds.iter().find(|f| !f.is_complete()) {
            return Err(Error::Incomplete {
                job: fold.key().to_string(),
                status: fold.status(),
            });
        }
        let folds = self
            .folds
            .iter()
            .map(|fold| fold.evaluate(phase))
            .collect::<Result<Vec<_>>>()?;
        let mean = Metrics::mean(&folds);
        Ok(CrossValidationReport { folds, mean })
    }

    pub fn delete(&self, keep_history: bool) -> Result<()> {
        for fold in &self.folds {
            fold.delete(keep_history)?;
        }
        Ok(())
    }
}
