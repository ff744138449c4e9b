//! Job orchestration: create → load → run → finalize for one fold.
//!
//! The orchestrator owns the job's status file and sequences the trainable
//! unit, the snapshot store, and the observer registry. Each epoch it runs the
//! batches, asks the checkpoint controller for a transition, and dispatches the
//! resulting triggers. Everything needed to resume lives in the `latest`
//! lineage, so killing the process at any point loses at most the epochs since
//! the last periodic save.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancellationFile;
use crate::checkpoint::{CheckpointState, check_step};
use crate::config::RekindleConfig;
use crate::error::{Error, Result, UnitError};
use crate::history::EpochLog;
use crate::layout::{JobKey, JobLayout};
use crate::metrics::{Metrics, MetricsAccumulator};
use crate::observer::{ActionContext, ObserverRegistry, Trigger};
use crate::options::JobOptions;
use crate::schedule::Schedule;
use crate::snapshot::{Lineage, SnapshotKey, SnapshotStore};
use crate::status::{JobStatus, read_status, write_status};
use crate::unit::{Architecture, Batch, DataSet, Phase, Sample, Split, Translator, UnitLease};

/// Prefix applied to validation metrics merged into epoch results.
pub const VALIDATION_PREFIX: &str = "val_";

/// One prediction: the raw unit output and, with a translator, its rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub output: Sample,
    pub label: Option<String>,
}

impl Prediction {
    /// Line written to `predictions.txt`.
    pub fn to_line(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self
                .output
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Operator view of a job directory, read without loading the unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub dir: PathBuf,
    pub status: JobStatus,
    /// Epochs completed in the committed `latest` lineage.
    pub latest_epochs: Option<usize>,
    /// Epochs completed when the `best` lineage was committed.
    pub best_epochs: Option<usize>,
    pub monitor: Option<String>,
    pub best_value: Option<f64>,
    /// Rows in `log.csv`.
    pub logged_epochs: usize,
}

impl JobSummary {
    pub fn read(dir: &Path, weights_extension: &str) -> Result<Self> {
        let layout = JobLayout::new(dir);
        let store = SnapshotStore::new(dir, weights_extension);
        let committed = |lineage: Lineage| {
            store
                .exists(lineage)
                .then(|| store.epoch(lineage).map(|c| c.epochs_completed))
                .transpose()
        };
        let latest_epochs = committed(Lineage::Latest)?;
        let best_epochs = committed(Lineage::Best)?;

        let checkpoint: Option<CheckpointState> = match best_epochs {
            Some(_) => Some(store.load_state(Lineage::Best, SnapshotKey::Checkpoint)?),
            None => None,
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            status: read_status(&layout.status_path()),
            latest_epochs,
            best_epochs,
            monitor: checkpoint.as_ref().map(|c| c.monitor.clone()),
            best_value: checkpoint.and_then(|c| c.best),
            logged_epochs: EpochLog::new(layout.log_path()).read()?.len(),
        })
    }
}

/// One job: an architecture trained on one fold of a dataset.
pub struct JobOrchestrator {
    architecture: Arc<dyn Architecture>,
    dataset: Arc<dyn DataSet>,
    options: JobOptions,
    key: JobKey,
    layout: JobLayout,
    store: SnapshotStore,
    cancellation: CancellationFile,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("key", &self.key)
            .field("dir", &self.layout.dir())
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    /// Validate the combination and compute the job's directory.
    ///
    /// Performs no I/O; an incompatible architecture/dataset pair or invalid
    /// options fail here with [`Error::BadSettings`].
    pub fn new(
        architecture: Arc<dyn Architecture>,
        dataset: Arc<dyn DataSet>,
        options: JobOptions,
        fold: usize,
        config: &RekindleConfig,
    ) -> Result<Self> {
        if architecture.output_tag() != dataset.output_tag() {
            return Err(Error::bad_settings(format!(
                "architecture '{}' produces '{}' outputs but dataset '{}' expects '{}'",
                architecture.name(),
                architecture.output_tag(),
                dataset.name(),
                dataset.output_tag()
            )));
        }
        options.validate()?;
        let splits = dataset.splits();
        if splits > 0 && fold >= splits {
            return Err(Error::bad_settings(format!(
                "fold {fold} out of range: dataset '{}' has {splits} splits",
                dataset.name()
            )));
        }

        let key = JobKey {
            architecture: architecture.name().to_string(),
            dataset: dataset.name().to_string(),
            loss: options.loss.clone(),
            optimizer: options.optimizer.clone(),
            epoch_budget: options.epoch_budget,
            patience: options.patience,
            fold,
        };
        let layout = JobLayout::for_key(&config.storage.root, &key);
        let store = SnapshotStore::new(layout.dir(), &config.storage.weights_extension);

        Ok(Self {
            architecture,
            dataset,
            options,
            key,
            layout,
            store,
            cancellation: CancellationFile::from_config(&config.cancellation),
        })
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn status(&self) -> JobStatus {
        read_status(&self.layout.status_path())
    }

    pub fn is_complete(&self) -> bool {
        self.status() == JobStatus::Complete
    }

    /// Train until completion, divergence, cancellation, or a unit fault.
    ///
    /// Idempotent: a job in a terminal status returns it untouched.
    pub fn train(&self) -> Result<JobStatus> {
        self.train_with(|_| {})
    }

    /// Like [`train`](Self::train), letting the caller append actions to the
    /// standard observer wiring first.
    pub fn train_with(&self, extend: impl FnOnce(&mut ObserverRegistry)) -> Result<JobStatus> {
        let status = self.status();
        if status.is_terminal() {
            tracing::info!(job = %self.key, %status, "Job already finished, nothing to do");
            return Ok(status);
        }

        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("train", job = %self.key, run = %run_id);
        let _guard = span.enter();

        match self.run(status, extend) {
            Ok(status) => Ok(status),
            Err(err) => match err.unit_error() {
                Some(UnitError::ResourceExhausted { message }) => {
                    tracing::error!(error = %message, "Resource exhausted, job will not be retried");
                    write_status(&self.layout.status_path(), JobStatus::ResourceError)?;
                    Ok(JobStatus::ResourceError)
                }
                Some(UnitError::IncompatibleShapes { message }) => {
                    tracing::error!(error = %message, "Architecture does not fit the dataset");
                    write_status(&self.layout.status_path(), JobStatus::BadSettings)?;
                    Ok(JobStatus::BadSettings)
                }
                _ => Err(err),
            },
        }
    }

    fn ensure_dataset(&self) -> Result<Split> {
        if !self.dataset.exists() {
            tracing::info!(dataset = self.dataset.name(), "Preparing dataset");
            self.dataset.prepare()?;
        }
        self.dataset.get_split(self.key.fold)
    }

    fn acquire(&self) -> Result<UnitLease> {
        Ok(UnitLease::acquire(
            self.architecture.as_ref(),
            self.dataset.as_ref(),
        )?)
    }

    /// Materialize both lineages at epoch 0 and mark the job `Training`.
    fn create(&self, lease: &UnitLease) -> Result<()> {
        std::fs::create_dir_all(self.layout.dir())?;
        let checkpoint = CheckpointState::new(&self.options);
        let schedule = self
            .options
            .schedule
            .build(self.options.learning_rate, self.options.direction);
        for lineage in Lineage::ALL {
            self.store
                .write_snapshot(lineage, &**lease, &schedule, &checkpoint, 0)?;
        }
        EpochLog::new(self.layout.log_path()).truncate_from(0)?;
        write_status(&self.layout.status_path(), JobStatus::Training)?;
        tracing::info!(dir = %self.layout.dir().display(), "Created job");
        Ok(())
    }

    fn run(&self, status: JobStatus, extend: impl FnOnce(&mut ObserverRegistry)) -> Result<JobStatus> {
        self.cancellation.clear()?;
        let split = self.ensure_dataset()?;
        if split.train.is_empty() {
            return Err(Error::dataset(format!(
                "fold {} of '{}' has no training rows",
                self.key.fold,
                self.dataset.name()
            )));
        }

        let mut lease = self.acquire()?;
        self.store.recover()?;
        if status == JobStatus::Pending || !self.store.exists(Lineage::Latest) {
            self.create(&lease)?;
        }

        let (mut schedule, mut checkpoint, counter) =
            self.store.read_snapshot(Lineage::Latest, &mut *lease)?;
        let start = counter.epochs_completed;
        self.reconcile_best(&mut checkpoint)?;
        let log = EpochLog::new(self.layout.log_path());
        log.truncate_from(start)?;

        let mut registry = ObserverRegistry::standard();
        extend(&mut registry);

        if checkpoint.finished(start) {
            // A crash after the stopping epoch was saved but before completion was recorded.
            tracing::info!(
                epochs = start,
                wait = checkpoint.wait,
                patience = checkpoint.patience,
                "Job already exhausted its patience or budget, completing"
            );
            let ctx = self.context(&lease, &checkpoint, &schedule);
            registry.fire(Trigger::Completion, start.saturating_sub(1), &ctx)?;
            return Ok(JobStatus::Complete);
        }

        tracing::info!(from_epoch = start, "Training");
        let batch_size = self.options.batch_size;
        let mut epoch = start;
        loop {
            if self.cancellation.should_poll(epoch - start) && self.cancellation.is_requested() {
                tracing::info!(epoch, "Cancellation requested, stopping");
                return Ok(JobStatus::Training);
            }

            let learning_rate = schedule.value();
            lease.set_learning_rate(learning_rate);

            let mut accumulator = MetricsAccumulator::default();
            for (step, batch) in split.train.batches(batch_size).enumerate() {
                let metrics = lease.train_batch(&batch)?;
                if let Some(trigger) = check_step(&metrics) {
                    tracing::error!(epoch, step, loss = ?metrics.loss(), "Non-finite loss, stopping");
                    let ctx = self.context(&lease, &checkpoint, &schedule);
                    registry.fire(trigger, epoch, &ctx)?;
                    return Ok(JobStatus::NanOrInfError);
                }
                accumulator.add(&metrics);
            }

            let mut metrics = accumulator.mean();
            if !split.validation.is_empty() {
                let batches: Vec<Batch<'_>> = split.validation.batches(batch_size).collect();
                metrics.extend(lease.evaluate(&batches)?.prefixed(VALIDATION_PREFIX));
            }

            if let Some(value) = metrics.get(&checkpoint.monitor) {
                let next = schedule.observe(value);
                if next < learning_rate {
                    tracing::info!(epoch, from = learning_rate, to = next, "Reduced learning rate");
                }
            }
            log.append(epoch, learning_rate, &metrics)?;

            let transition = checkpoint.end_epoch(epoch, &metrics);
            for warning in &transition.warnings {
                tracing::warn!(epoch, "{warning}");
            }
            checkpoint = transition.state;
            tracing::info!(
                epoch,
                lr = learning_rate,
                monitor = %checkpoint.monitor,
                value = ?metrics.get(&checkpoint.monitor),
                best = ?checkpoint.best,
                wait = checkpoint.wait,
                "Epoch complete"
            );

            let ctx = self.context(&lease, &checkpoint, &schedule);
            for trigger in &transition.effects {
                registry.fire(*trigger, epoch, &ctx)?;
            }
            if transition.stop {
                tracing::info!(epoch, best = ?checkpoint.best, "Training complete");
                return Ok(JobStatus::Complete);
            }
            epoch += 1;
        }
    }

    /// The best value carried by `latest` must be the one whose weights sit in
    /// the `best` lineage. A crash between the two commits of an improving
    /// epoch leaves `latest` ahead; fall back to the committed best.
    fn reconcile_best(&self, checkpoint: &mut CheckpointState) -> Result<()> {
        if !self.store.exists(Lineage::Best) {
            return Ok(());
        }
        let committed: CheckpointState =
            self.store.load_state(Lineage::Best, SnapshotKey::Checkpoint)?;
        if committed.best != checkpoint.best {
            tracing::warn!(
                latest = ?checkpoint.best,
                committed = ?committed.best,
                "Best value in the latest lineage has no matching best snapshot, reconciling"
            );
            checkpoint.best = committed.best;
        }
        Ok(())
    }

    fn context<'a>(
        &'a self,
        lease: &'a UnitLease,
        checkpoint: &'a CheckpointState,
        schedule: &'a Schedule,
    ) -> ActionContext<'a> {
        ActionContext {
            unit: &**lease,
            store: &self.store,
            layout: &self.layout,
            checkpoint,
            schedule,
        }
    }

    fn require_complete(&self) -> Result<()> {
        match self.status() {
            JobStatus::Complete => Ok(()),
            status => Err(Error::Incomplete {
                job: self.key.to_string(),
                status,
            }),
        }
    }

    /// Acquire a unit holding the `best` lineage's weights.
    fn load_best(&self) -> Result<UnitLease> {
        let mut lease = self.acquire()?;
        self.store.recover()?;
        self.store.read_snapshot(Lineage::Best, &mut *lease)?;
        Ok(lease)
    }

    /// Score the best snapshot on one phase of the fold.
    pub fn evaluate(&self, phase: Phase) -> Result<Metrics> {
        self.require_complete()?;
        let split = self.ensure_dataset()?;
        let mut lease = self.load_best()?;
        let batches: Vec<Batch<'_>> = split
            .phase(phase)
            .batches(self.options.batch_size)
            .collect();
        let metrics = lease.evaluate(&batches)?;
        tracing::info!(job = %self.key, %phase, ?metrics, "Evaluated best snapshot");
        Ok(metrics)
    }

    /// Run the best snapshot on `inputs`, writing one line per prediction to
    /// `predictions.txt`.
    pub fn predict(
        &self,
        inputs: &[Sample],
        translator: Option<&dyn Translator>,
    ) -> Result<Vec<Prediction>> {
        self.require_complete()?;
        let mut lease = self.load_best()?;
        let predictions: Vec<Prediction> = lease
            .predict(inputs)?
            .into_iter()
            .map(|output| Prediction {
                label: translator.map(|t| t.translate(&output)),
                output,
            })
            .collect();

        let mut text = String::new();
        for prediction in &predictions {
            text.push_str(&prediction.to_line());
            text.push('\n');
        }
        crate::persistence::atomic_write(&self.layout.predictions_path(), text.as_bytes())?;
        tracing::info!(job = %self.key, count = predictions.len(), "Wrote predictions");
        Ok(predictions)
    }

    pub fn delete(&self, keep_history: bool) -> Result<()> {
        self.layout.delete(keep_history)
    }

    pub fn describe(&self) -> Result<JobSummary> {
        JobSummary::read(self.layout.dir(), self.store.weights_extension())
    }
}
