//! Snapshot lineages: `latest` and `best`.
//!
//! A lineage holds four keys (weights, schedule state, checkpoint state, epoch
//! counter) that always describe the same iteration. Writes are staged in
//! `<lineage>.staging/`; saving the epoch counter is the commit, which records
//! digests of the staged blobs and swaps the staging directory in for the
//! committed one. A crash at any point leaves the last committed iteration
//! intact and loadable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::checkpoint::CheckpointState;
use crate::error::{Result, SnapshotError};
use crate::persistence::{StateBlob, atomic_write, file_digest};
use crate::schedule::Schedule;
use crate::unit::TrainableUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lineage {
    /// Most recently persisted iteration.
    Latest,
    /// Best iteration by the monitored metric.
    Best,
}

impl Lineage {
    pub const ALL: [Lineage; 2] = [Lineage::Latest, Lineage::Best];

    pub fn as_str(self) -> &'static str {
        match self {
            Lineage::Latest => "latest",
            Lineage::Best => "best",
        }
    }
}

impl std::fmt::Display for Lineage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Lineage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Lineage::Latest),
            "best" => Ok(Lineage::Best),
            other => Err(format!("unknown lineage '{other}' (expected latest or best)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKey {
    Weights,
    Schedule,
    Checkpoint,
    /// Commit marker, always written last.
    Epoch,
}

impl SnapshotKey {
    /// Keys whose digests the commit marker records.
    pub const STAGED: [SnapshotKey; 3] = [
        SnapshotKey::Weights,
        SnapshotKey::Schedule,
        SnapshotKey::Checkpoint,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotKey::Weights => "weights",
            SnapshotKey::Schedule => "schedule",
            SnapshotKey::Checkpoint => "checkpoint",
            SnapshotKey::Epoch => "epoch",
        }
    }

    pub fn file_name(self, weights_extension: &str) -> String {
        match self {
            SnapshotKey::Weights => format!("weights.{weights_extension}"),
            SnapshotKey::Schedule => "lr.json".to_string(),
            SnapshotKey::Checkpoint => "mcp.json".to_string(),
            SnapshotKey::Epoch => "epoch.json".to_string(),
        }
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Epoch counter and commit marker of a lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochCounter {
    /// Number of completed epochs; the next epoch to run has this index.
    pub epochs_completed: usize,
    /// SHA-256 of each staged key, filled in at commit.
    #[serde(default)]
    pub digests: BTreeMap<String, String>,
}

impl EpochCounter {
    pub fn new(epochs_completed: usize) -> Self {
        Self {
            epochs_completed,
            digests: BTreeMap::new(),
        }
    }

    /// Index of the iteration this lineage reflects, `None` at creation.
    pub fn last_epoch(&self) -> Option<usize> {
        self.epochs_completed.checked_sub(1)
    }
}

impl StateBlob for EpochCounter {
    const KIND: &'static str = "epoch";
}

pub(crate) fn staging_dir(root: &Path, lineage: Lineage) -> PathBuf {
    root.join(format!("{}.staging", lineage.as_str()))
}

pub(crate) fn previous_dir(root: &Path, lineage: Lineage) -> PathBuf {
    root.join(format!("{}.previous", lineage.as_str()))
}

/// Key-value persistence of state blobs under the two lineages of one job.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    weights_extension: String,
}

impl SnapshotStore {
    /// A store rooted at the job directory. Performs no I/O.
    pub fn new(root: impl Into<PathBuf>, weights_extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            weights_extension: weights_extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn weights_extension(&self) -> &str {
        &self.weights_extension
    }

    fn committed_dir(&self, lineage: Lineage) -> PathBuf {
        self.root.join(lineage.as_str())
    }

    /// Finish or roll back swaps interrupted by a crash and discard
    /// uncommitted staging directories.
    pub fn recover(&self) -> Result<()> {
        for lineage in Lineage::ALL {
            let committed = self.committed_dir(lineage);
            let previous = previous_dir(&self.root, lineage);
            let staging = staging_dir(&self.root, lineage);

            if previous.exists() {
                if committed.exists() {
                    std::fs::remove_dir_all(&previous)?;
                } else {
                    tracing::warn!(%lineage, "Restoring previous commit after interrupted swap");
                    std::fs::rename(&previous, &committed)?;
                }
            }
            if staging.exists() {
                tracing::warn!(%lineage, "Discarding uncommitted staged snapshot");
                std::fs::remove_dir_all(&staging)?;
            }
        }
        Ok(())
    }

    /// Path of a committed key.
    pub fn blob_path(&self, lineage: Lineage, key: SnapshotKey) -> PathBuf {
        self.committed_dir(lineage)
            .join(key.file_name(&self.weights_extension))
    }

    /// Path a key is staged at, creating the staging directory.
    pub fn staging_path(&self, lineage: Lineage, key: SnapshotKey) -> Result<PathBuf> {
        let dir = staging_dir(&self.root, lineage);
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(key.file_name(&self.weights_extension)))
    }

    /// Start a fresh lineage update, dropping anything staged before.
    pub fn begin(&self, lineage: Lineage) -> Result<()> {
        let dir = staging_dir(&self.root, lineage);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(())
    }

    /// Save one key. Saving [`SnapshotKey::Epoch`] commits the lineage.
    pub fn save(&self, lineage: Lineage, key: SnapshotKey, blob: &[u8]) -> Result<()> {
        if key == SnapshotKey::Epoch {
            let counter = EpochCounter::from_blob(blob)?;
            return self.commit(lineage, counter.epochs_completed);
        }
        let path = self.staging_path(lineage, key)?;
        atomic_write(&path, blob)?;
        Ok(())
    }

    /// Write the commit marker for the staged keys and make them current.
    pub fn commit(&self, lineage: Lineage, epochs_completed: usize) -> Result<()> {
        let staging = staging_dir(&self.root, lineage);
        let mut counter = EpochCounter::new(epochs_completed);
        for key in SnapshotKey::STAGED {
            let path = staging.join(key.file_name(&self.weights_extension));
            if !path.exists() {
                return Err(SnapshotError::NotStaged { lineage, key }.into());
            }
            counter
                .digests
                .insert(key.as_str().to_string(), file_digest(&path)?);
        }
        let marker = staging.join(SnapshotKey::Epoch.file_name(&self.weights_extension));
        atomic_write(&marker, &counter.to_blob()?)?;

        let committed = self.committed_dir(lineage);
        let previous = previous_dir(&self.root, lineage);
        if previous.exists() {
            std::fs::remove_dir_all(&previous)?;
        }
        if committed.exists() {
            std::fs::rename(&committed, &previous)?;
        }
        std::fs::rename(&staging, &committed)?;
        if previous.exists() {
            std::fs::remove_dir_all(&previous)?;
        }

        tracing::debug!(%lineage, epochs_completed, "Committed lineage");
        Ok(())
    }

    /// Whether the committed lineage is complete and internally consistent.
    pub fn exists(&self, lineage: Lineage) -> bool {
        match self.verify(lineage) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(%lineage, error = %e, "Lineage not usable");
                false
            }
        }
    }

    /// Check that every key is present and matches the marker's digests.
    pub fn verify(&self, lineage: Lineage) -> Result<()> {
        let counter = self.epoch(lineage)?;
        for key in SnapshotKey::STAGED {
            let path = self.blob_path(lineage, key);
            if !path.exists() {
                return Err(SnapshotError::MissingKey { lineage, key }.into());
            }
            let recorded = counter
                .digests
                .get(key.as_str())
                .ok_or(SnapshotError::MissingKey { lineage, key })?;
            if &file_digest(&path)? != recorded {
                return Err(SnapshotError::DigestMismatch { lineage, key }.into());
            }
        }
        Ok(())
    }

    pub fn load(&self, lineage: Lineage, key: SnapshotKey) -> Result<Vec<u8>> {
        let path = self.blob_path(lineage, key);
        if !path.exists() {
            return Err(SnapshotError::MissingKey { lineage, key }.into());
        }
        Ok(std::fs::read(&path)?)
    }

    pub fn load_state<T: StateBlob>(&self, lineage: Lineage, key: SnapshotKey) -> Result<T> {
        T::from_blob(&self.load(lineage, key)?)
    }

    pub fn epoch(&self, lineage: Lineage) -> Result<EpochCounter> {
        self.load_state(lineage, SnapshotKey::Epoch)
    }

    /// Persist a full snapshot of the job into `lineage` as one commit.
    ///
    /// Order: weights, schedule, checkpoint state, then the epoch counter.
    pub fn write_snapshot(
        &self,
        lineage: Lineage,
        unit: &dyn TrainableUnit,
        schedule: &Schedule,
        checkpoint: &CheckpointState,
        epochs_completed: usize,
    ) -> Result<()> {
        self.begin(lineage)?;
        let weights = self.staging_path(lineage, SnapshotKey::Weights)?;
        unit.save_weights(&weights)?;
        self.save(lineage, SnapshotKey::Schedule, &schedule.to_blob()?)?;
        self.save(lineage, SnapshotKey::Checkpoint, &checkpoint.to_blob()?)?;
        self.save(
            lineage,
            SnapshotKey::Epoch,
            &EpochCounter::new(epochs_completed).to_blob()?,
        )
    }

    /// Load a full snapshot from a verified lineage into `unit`.
    pub fn read_snapshot(
        &self,
        lineage: Lineage,
        unit: &mut dyn TrainableUnit,
    ) -> Result<(Schedule, CheckpointState, EpochCounter)> {
        self.verify(lineage).map_err(|e| {
            tracing::warn!(%lineage, error = %e, "Refusing to load incomplete lineage");
            SnapshotError::IncompleteLineage {
                lineage,
                path: self.committed_dir(lineage),
            }
        })?;
        unit.load_weights(&self.blob_path(lineage, SnapshotKey::Weights))?;
        let schedule = self.load_state(lineage, SnapshotKey::Schedule)?;
        let checkpoint = self.load_state(lineage, SnapshotKey::Checkpoint)?;
        let counter = self.epoch(lineage)?;
        Ok((schedule, checkpoint, counter))
    }
}
