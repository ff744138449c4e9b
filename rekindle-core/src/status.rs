//! Persisted job status.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;
use crate::persistence::atomic_write;

/// Status of a training job.
///
/// `Pending` is never written to disk: it is what a job reads as before
/// `create` has produced a status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Training,
    Complete,
    NanOrInfError,
    ResourceError,
    BadSettings,
}

impl JobStatus {
    /// Whether the status is sticky history that training may not mutate.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete
                | JobStatus::NanOrInfError
                | JobStatus::ResourceError
                | JobStatus::BadSettings
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Training => "Training",
            JobStatus::Complete => "Complete",
            JobStatus::NanOrInfError => "NanOrInfError",
            JobStatus::ResourceError => "ResourceError",
            JobStatus::BadSettings => "BadSettings",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "Pending" => Ok(JobStatus::Pending),
            "Training" => Ok(JobStatus::Training),
            "Complete" => Ok(JobStatus::Complete),
            "NanOrInfError" => Ok(JobStatus::NanOrInfError),
            "ResourceError" => Ok(JobStatus::ResourceError),
            "BadSettings" => Ok(JobStatus::BadSettings),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Read the status file, treating anything missing or unparseable as `Pending`.
pub fn read_status(path: &Path) -> JobStatus {
    match std::fs::read_to_string(path) {
        Ok(content) => content.parse().unwrap_or_else(|e: String| {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable status file");
            JobStatus::Pending
        }),
        Err(_) => JobStatus::Pending,
    }
}

pub fn write_status(path: &Path, status: JobStatus) -> Result<()> {
    atomic_write(path, status.as_str().as_bytes())?;
    tracing::debug!(path = %path.display(), %status, "Wrote job status");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_status_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.txt");
        write_status(&path, JobStatus::NanOrInfError).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "NanOrInfError"
        );
        assert_eq!(read_status(&path), JobStatus::NanOrInfError);
    }

    #[test]
    fn test_missing_or_garbage_status_reads_pending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.txt");
        assert_eq!(read_status(&path), JobStatus::Pending);

        std::fs::write(&path, "half-writ").unwrap();
        assert_eq!(read_status(&path), JobStatus::Pending);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Training.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::NanOrInfError.is_terminal());
        assert!(JobStatus::ResourceError.is_terminal());
        assert!(JobStatus::BadSettings.is_terminal());
    }

    #[test]
    fn test_parse_tolerates_trailing_newline() {
        assert_eq!("Complete\n".parse::<JobStatus>(), Ok(JobStatus::Complete));
    }
}
