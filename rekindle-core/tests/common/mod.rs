//! Scripted trainable units and datasets for integration tests.
//!
//! A `ScriptedUnit` replays a per-fold script of epoch outcomes. Its only
//! "weight" is the number of epochs it has trained, so a unit reloaded from a
//! lineage continues the script exactly where that lineage left off.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rekindle_core::config::RekindleConfig;
use rekindle_core::error::{Result, UnitError};
use rekindle_core::metrics::Metrics;
use rekindle_core::options::JobOptions;
use rekindle_core::unit::{Architecture, Arrays, Batch, DataSet, Sample, Split, TrainableUnit};

/// Outcome of one epoch's single training batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Loss(f64),
    Nan,
    OutOfMemory,
    BadShape,
}

#[derive(Debug, Default)]
pub struct Probe {
    pub creations: AtomicUsize,
    pub releases: AtomicUsize,
    pub batches: AtomicUsize,
    pub learning_rates: Mutex<Vec<f64>>,
    pub trained_folds: Mutex<Vec<usize>>,
}

impl Probe {
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn learning_rates(&self) -> Vec<f64> {
        self.learning_rates.lock().unwrap().clone()
    }

    pub fn trained_folds(&self) -> Vec<usize> {
        let mut folds = self.trained_folds.lock().unwrap().clone();
        folds.dedup();
        folds
    }
}

pub struct ScriptedUnit {
    scripts: Arc<Vec<Vec<Step>>>,
    probe: Arc<Probe>,
    epochs: usize,
}

impl ScriptedUnit {
    fn step(&self, fold: usize, epoch: usize) -> Step {
        let script = &self.scripts[fold.min(self.scripts.len() - 1)];
        script[epoch.min(script.len() - 1)]
    }

    fn last_loss(&self, fold: usize) -> f64 {
        match self.step(fold, self.epochs.saturating_sub(1)) {
            Step::Loss(value) => value,
            _ => f64::NAN,
        }
    }
}

fn fold_of(x: &[Sample]) -> usize {
    x.first().and_then(|row| row.first()).copied().unwrap_or(0.0) as usize
}

impl TrainableUnit for ScriptedUnit {
    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.probe.learning_rates.lock().unwrap().push(learning_rate);
    }

    fn train_batch(&mut self, batch: &Batch<'_>) -> std::result::Result<Metrics, UnitError> {
        let fold = fold_of(batch.x);
        self.probe.batches.fetch_add(1, Ordering::SeqCst);
        self.probe.trained_folds.lock().unwrap().push(fold);
        let step = self.step(fold, self.epochs);
        self.epochs += 1;
        match step {
            Step::Loss(value) => Ok(Metrics::new().with("loss", value)),
            Step::Nan => Ok(Metrics::new().with("loss", f64::NAN)),
            Step::OutOfMemory => Err(UnitError::resource_exhausted("failed to allocate tensor")),
            Step::BadShape => Err(UnitError::incompatible_shapes("logits [1, 3] vs labels [1, 5]")),
        }
    }

    fn evaluate(&mut self, batches: &[Batch<'_>]) -> std::result::Result<Metrics, UnitError> {
        let fold = batches.first().map(|b| fold_of(b.x)).unwrap_or(0);
        Ok(Metrics::new()
            .with("loss", self.last_loss(fold))
            .with("epochs", self.epochs as f64))
    }

    fn predict(&mut self, inputs: &[Sample]) -> std::result::Result<Vec<Sample>, UnitError> {
        Ok(inputs
            .iter()
            .map(|row| row.iter().map(|v| v * self.epochs as f32).collect())
            .collect())
    }

    fn save_weights(&self, path: &Path) -> std::result::Result<(), UnitError> {
        std::fs::write(path, self.epochs.to_string())?;
        Ok(())
    }

    fn load_weights(&mut self, path: &Path) -> std::result::Result<(), UnitError> {
        let content = std::fs::read_to_string(path)?;
        self.epochs = content
            .trim()
            .parse()
            .map_err(|_| UnitError::failed("corrupt weights"))?;
        Ok(())
    }

    fn release(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedArchitecture {
    pub name: String,
    pub tag: String,
    scripts: Arc<Vec<Vec<Step>>>,
    pub probe: Arc<Probe>,
}

impl ScriptedArchitecture {
    /// Same script on every fold.
    pub fn new(script: Vec<Step>) -> Self {
        Self::per_fold(vec![script])
    }

    pub fn per_fold(scripts: Vec<Vec<Step>>) -> Self {
        assert!(scripts.iter().all(|s| !s.is_empty()));
        Self {
            name: "mlp".into(),
            tag: "classes".into(),
            scripts: Arc::new(scripts),
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.into();
        self
    }
}

impl Architecture for ScriptedArchitecture {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_tag(&self) -> &str {
        &self.tag
    }

    fn create(
        &self,
        _resolution: usize,
        _class_count: usize,
    ) -> std::result::Result<Box<dyn TrainableUnit>, UnitError> {
        self.probe.creations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedUnit {
            scripts: self.scripts.clone(),
            probe: self.probe.clone(),
            epochs: 0,
        }))
    }
}

/// One training row per fold, tagged with the fold index.
pub struct ScriptedDataSet {
    pub splits: usize,
    pub with_validation: bool,
    pub prepared: AtomicBool,
    pub preparations: AtomicUsize,
}

impl ScriptedDataSet {
    pub fn new(splits: usize) -> Self {
        Self {
            splits,
            with_validation: false,
            prepared: AtomicBool::new(false),
            preparations: AtomicUsize::new(0),
        }
    }

    pub fn with_validation(mut self) -> Self {
        self.with_validation = true;
        self
    }
}

impl DataSet for ScriptedDataSet {
    fn name(&self) -> &str {
        "digits"
    }

    fn output_tag(&self) -> &str {
        "classes"
    }

    fn resolution(&self) -> usize {
        8
    }

    fn class_count(&self) -> usize {
        10
    }

    fn splits(&self) -> usize {
        self.splits
    }

    fn get_split(&self, index: usize) -> Result<Split> {
        let rows = |n: usize| {
            Arrays::new(
                (0..n).map(|_| vec![index as f32, 1.0]).collect(),
                (0..n).map(|_| vec![0.0]).collect(),
            )
        };
        Ok(Split {
            train: rows(1),
            validation: if self.with_validation { rows(1) } else { Arrays::default() },
            test: rows(2),
        })
    }

    fn exists(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    fn prepare(&self) -> Result<()> {
        self.preparations.fetch_add(1, Ordering::SeqCst);
        self.prepared.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn losses(values: &[f64]) -> Vec<Step> {
    values.iter().copied().map(Step::Loss).collect()
}

/// Options monitoring the training loss with a constant learning rate.
pub fn options(patience: usize, epoch_budget: usize) -> JobOptions {
    JobOptions {
        monitor: "loss".into(),
        patience,
        epoch_budget,
        schedule: rekindle_core::schedule::ScheduleOptions::Constant,
        ..JobOptions::default()
    }
}

/// Configuration rooted in a temporary workspace.
pub fn config(workspace: &Path) -> RekindleConfig {
    RekindleConfig::default().rooted_at(workspace)
}
