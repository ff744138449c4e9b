//! # Rekindle Core
//!
//! Resumable, observer-driven training checkpoint orchestration.
//! Provides the checkpoint state machine, the `latest`/`best` snapshot
//! lineages, the observer registry, learning-rate schedules, per-fold job
//! orchestration, cross-validation, and configuration.
//!
//! The numeric side of training (the model, the data) stays behind the
//! [`TrainableUnit`], [`Architecture`], and [`DataSet`] traits.

pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod crossval;
pub mod error;
pub mod history;
pub mod job;
pub mod layout;
pub mod metrics;
pub mod observer;
pub mod options;
pub mod persistence;
pub mod schedule;
pub mod snapshot;
pub mod status;
pub mod unit;

// Re-export commonly used types at the crate root.
pub use cancel::CancellationFile;
pub use checkpoint::{CheckpointState, Transition};
pub use config::{RekindleConfig, load_config, write_default_config};
pub use crossval::{CrossValidationReport, CrossValidationRunner};
pub use error::{ConfigError, Error, Result, SnapshotError, UnitError};
pub use history::{EpochLog, EpochRecord};
pub use job::{JobOrchestrator, JobSummary, Prediction};
pub use layout::{JobKey, JobLayout};
pub use metrics::{Direction, Metrics};
pub use observer::{Action, ActionContext, ObserverRegistry, Trigger};
pub use options::JobOptions;
pub use schedule::{PlateauOptions, Schedule, ScheduleOptions};
pub use snapshot::{EpochCounter, Lineage, SnapshotKey, SnapshotStore};
pub use status::JobStatus;
pub use unit::{
    Architecture, Arrays, Batch, DataSet, Phase, Sample, Split, TrainableUnit, Translator,
    UnitLease,
};
