//! Per-job hyperparameters and checkpoint policy.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::Direction;
use crate::schedule::ScheduleOptions;

/// Options shared by every fold of one architecture/dataset combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Loss function name, part of the job key.
    #[serde(default = "default_loss")]
    pub loss: String,
    /// Optimizer name, part of the job key.
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Initial value of the learning-rate schedule.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Total epoch budget; 0 leaves stopping to patience alone.
    #[serde(default)]
    pub epoch_budget: usize,
    /// Consecutive non-improving epochs tolerated before completion.
    #[serde(default = "default_patience")]
    pub patience: usize,
    /// Epochs between periodic saves of the latest lineage.
    #[serde(default = "default_period")]
    pub period: usize,
    /// Metric name watched for improvement (e.g. `val_loss`).
    #[serde(default = "default_monitor")]
    pub monitor: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    #[serde(default)]
    pub min_delta: f64,
    #[serde(default)]
    pub schedule: ScheduleOptions,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            loss: default_loss(),
            optimizer: default_optimizer(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            epoch_budget: 0,
            patience: default_patience(),
            period: default_period(),
            monitor: default_monitor(),
            direction: default_direction(),
            min_delta: 0.0,
            schedule: ScheduleOptions::default(),
        }
    }
}

impl JobOptions {
    pub fn validate(&self) -> Result<()> {
        if self.loss.trim().is_empty() || self.optimizer.trim().is_empty() {
            return Err(Error::bad_settings("loss and optimizer names are required"));
        }
        if self.batch_size == 0 {
            return Err(Error::bad_settings("batch_size must be >= 1"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::bad_settings("learning_rate must be > 0"));
        }
        if self.patience == 0 {
            return Err(Error::bad_settings("patience must be >= 1"));
        }
        if self.period == 0 {
            return Err(Error::bad_settings("period must be >= 1"));
        }
        if self.monitor.trim().is_empty() {
            return Err(Error::bad_settings("monitor metric name is required"));
        }
        if !(self.min_delta >= 0.0) {
            return Err(Error::bad_settings("min_delta must be >= 0"));
        }
        self.schedule.validate()
    }
}

fn default_loss() -> String {
    "crossentropy".to_string()
}

fn default_optimizer() -> String {
    "adam".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_patience() -> usize {
    10
}

fn default_period() -> usize {
    1
}

fn default_monitor() -> String {
    "val_loss".to_string()
}

fn default_direction() -> Direction {
    Direction::ImprovesIfLess
}
