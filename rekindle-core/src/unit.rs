//! External collaborators: the trainable unit, its architecture factory, the
//! dataset, and output translators.
//!
//! None of these are implemented here. The orchestrator only ever sees the
//! traits, so any numeric backend can be plugged in.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::error::{Result, UnitError};
use crate::metrics::Metrics;

/// One input or output row.
pub type Sample = Vec<f32>;

/// The opaque numerical model.
pub trait TrainableUnit: Send {
    /// Learning rate for subsequent `train_batch` calls.
    fn set_learning_rate(&mut self, learning_rate: f64);

    /// One micro-step. The returned metrics should carry `loss`.
    fn train_batch(&mut self, batch: &Batch<'_>) -> Result<Metrics, UnitError>;

    fn evaluate(&mut self, batches: &[Batch<'_>]) -> Result<Metrics, UnitError>;

    fn predict(&mut self, inputs: &[Sample]) -> Result<Vec<Sample>, UnitError>;

    fn save_weights(&self, path: &Path) -> Result<(), UnitError>;

    fn load_weights(&mut self, path: &Path) -> Result<(), UnitError>;

    /// Clear the in-memory numeric context (accelerator memory, graphs).
    fn release(&mut self) {}
}

/// Factory for trainable units.
pub trait Architecture: Send + Sync {
    fn name(&self) -> &str;

    /// Output-shape compatibility tag; must equal the dataset's tag.
    fn output_tag(&self) -> &str;

    fn create(
        &self,
        resolution: usize,
        class_count: usize,
    ) -> Result<Box<dyn TrainableUnit>, UnitError>;
}

pub trait DataSet: Send + Sync {
    fn name(&self) -> &str;

    fn output_tag(&self) -> &str;

    fn resolution(&self) -> usize;

    fn class_count(&self) -> usize;

    /// Number of train/validation/test partitions (folds).
    fn splits(&self) -> usize;

    fn get_split(&self, index: usize) -> Result<Split>;

    /// Whether the prepared data is on disk.
    fn exists(&self) -> bool;

    fn prepare(&self) -> Result<()>;
}

/// Renders a raw prediction in domain terms (e.g. a class label).
pub trait Translator {
    fn translate(&self, output: &[f32]) -> String;
}

/// Data phase a job can be scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Training,
    Validation,
    Test,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Training => write!(f, "training"),
            Phase::Validation => write!(f, "validation"),
            Phase::Test => write!(f, "test"),
        }
    }
}

/// Paired inputs and targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arrays {
    pub x: Vec<Sample>,
    pub y: Vec<Sample>,
}

impl Arrays {
    pub fn new(x: Vec<Sample>, y: Vec<Sample>) -> Self {
        Self { x, y }
    }

    pub fn len(&self) -> usize {
        self.x.len().min(self.y.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consecutive batches of at most `batch_size` rows; the last may be short.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Batch<'_>> {
        let len = self.len();
        let size = batch_size.max(1);
        (0..len).step_by(size).map(move |start| {
            let end = (start + size).min(len);
            Batch {
                x: &self.x[start..end],
                y: &self.y[start..end],
            }
        })
    }
}

/// A borrowed window of rows fed to the unit in one micro-step.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub x: &'a [Sample],
    pub y: &'a [Sample],
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// One fold's train/validation/test partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Split {
    pub train: Arrays,
    pub validation: Arrays,
    pub test: Arrays,
}

impl Split {
    pub fn phase(&self, phase: Phase) -> &Arrays {
        match phase {
            Phase::Training => &self.train,
            Phase::Validation => &self.validation,
            Phase::Test => &self.test,
        }
    }
}

/// Exclusive, scoped ownership of a trainable unit.
///
/// The unit's numeric context is released when the lease drops, on success
/// and failure paths alike, so the next fold starts from a clean runtime.
pub struct UnitLease {
    unit: Box<dyn TrainableUnit>,
}

impl UnitLease {
    pub fn acquire(
        architecture: &dyn Architecture,
        dataset: &dyn DataSet,
    ) -> Result<Self, UnitError> {
        let unit = architecture.create(dataset.resolution(), dataset.class_count())?;
        tracing::debug!(
            architecture = architecture.name(),
            dataset = dataset.name(),
            "Acquired trainable unit"
        );
        Ok(Self { unit })
    }
}

impl Deref for UnitLease {
    type Target = dyn TrainableUnit;

    fn deref(&self) -> &Self::Target {
        self.unit.as_ref()
    }
}

impl DerefMut for UnitLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.unit.as_mut()
    }
}

impl Drop for UnitLease {
    fn drop(&mut self) {
        self.unit.release();
        tracing::debug!("Released trainable unit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUnit {
        releases: Arc<AtomicUsize>,
    }

    impl TrainableUnit for CountingUnit {
        fn set_learning_rate(&mut self, _learning_rate: f64) {}

        fn train_batch(&mut self, _batch: &Batch<'_>) -> Result<Metrics, UnitError> {
            Err(UnitError::resource_exhausted("out of device memory"))
        }

        fn evaluate(&mut self, _batches: &[Batch<'_>]) -> Result<Metrics, UnitError> {
            Ok(Metrics::new())
        }

        fn predict(&mut self, inputs: &[Sample]) -> Result<Vec<Sample>, UnitError> {
            Ok(inputs.to_vec())
        }

        fn save_weights(&self, _path: &Path) -> Result<(), UnitError> {
            Ok(())
        }

        fn load_weights(&mut self, _path: &Path) -> Result<(), UnitError> {
            Ok(())
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_batches_cover_all_rows() {
        let arrays = Arrays::new(
            (0..5).map(|i| vec![i as f32]).collect(),
            (0..5).map(|_| vec![0.0]).collect(),
        );
        let sizes: Vec<usize> = arrays.batches(2).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(arrays.batches(0).count(), 5);
        assert_eq!(Arrays::default().batches(4).count(), 0);
    }

    #[test]
    fn test_lease_releases_on_error_path() {
        let releases = Arc::new(AtomicUsize::new(0));
        let run = || -> Result<Metrics, UnitError> {
            let mut lease = UnitLease {
                unit: Box::new(CountingUnit {
                    releases: releases.clone(),
                }),
            };
            let arrays = Arrays::new(vec![vec![1.0]], vec![vec![1.0]]);
            let batch = arrays.batches(1).next().unwrap();
            lease.train_batch(&batch)
        };
        assert!(run().is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
