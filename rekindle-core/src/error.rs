//! Error types for the Rekindle core library.
//!
//! Uses `thiserror` for the public error taxonomy: configuration problems,
//! trainable-unit faults, snapshot integrity failures, and completeness
//! preconditions.

use std::path::PathBuf;

use crate::snapshot::{Lineage, SnapshotKey};
use crate::status::JobStatus;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type for Rekindle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Architecture/dataset incompatibility or invalid job options.
    /// Raised before any I/O so batch drivers can skip and continue.
    #[error("Bad settings: {message}")]
    BadSettings { message: String },

    #[error("Training incomplete: job {job} is {status}")]
    Incomplete { job: String, status: JobStatus },

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Trainable unit error: {0}")]
    Unit(#[from] UnitError),

    #[error("Observer action '{action}' failed at epoch {epoch}: {source}")]
    Action {
        action: String,
        epoch: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Dataset error: {message}")]
    Dataset { message: String },

    #[error("Epoch log error: {message}")]
    History { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn bad_settings(message: impl Into<String>) -> Self {
        Self::BadSettings {
            message: message.into(),
        }
    }

    pub fn dataset(message: impl Into<String>) -> Self {
        Self::Dataset {
            message: message.into(),
        }
    }

    /// The trainable-unit fault behind this error, looking through failed
    /// observer actions.
    pub fn unit_error(&self) -> Option<&UnitError> {
        match self {
            Self::Unit(err) => Some(err),
            Self::Action { source, .. } => source.unit_error(),
            _ => None,
        }
    }
}

/// Faults reported by the opaque trainable unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    /// Memory or accelerator allocation failure.
    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },

    /// Architecture output shape does not fit the dataset.
    #[error("Incompatible shapes: {message}")]
    IncompatibleShapes { message: String },

    #[error("Unit failure: {message}")]
    Failed { message: String },
}

impl UnitError {
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    pub fn incompatible_shapes(message: impl Into<String>) -> Self {
        Self::IncompatibleShapes {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for UnitError {
    fn from(err: std::io::Error) -> Self {
        Self::failed(err.to_string())
    }
}

/// Errors from snapshot lineage persistence.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Lineage '{lineage}' is incomplete at {path}")]
    IncompleteLineage { lineage: Lineage, path: PathBuf },

    #[error("Missing key '{key}' in lineage '{lineage}'")]
    MissingKey { lineage: Lineage, key: SnapshotKey },

    #[error("Key '{key}' was not staged for lineage '{lineage}' before commit")]
    NotStaged { lineage: Lineage, key: SnapshotKey },

    #[error("Digest mismatch for key '{key}' in lineage '{lineage}'")]
    DigestMismatch { lineage: Lineage, key: SnapshotKey },

    #[error("Unsupported {kind} schema version {found} (expected {expected})")]
    UnsupportedVersion {
        kind: String,
        found: u32,
        expected: u32,
    },

    #[error("Blob kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: String, found: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
