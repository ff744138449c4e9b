//! Per-epoch training history in `log.csv`.
//!
//! The header `epoch,timestamp,lr,<metric names...>` is fixed by the first
//! row written. Later rows follow the header's columns; metrics missing from a
//! row leave an empty cell and metrics not in the header are dropped.

use chrono::{DateTime, Utc};
use csv::StringRecord;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::persistence::atomic_write;

const FIXED_COLUMNS: [&str; 3] = ["epoch", "timestamp", "lr"];

/// One parsed row of the log.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub timestamp: DateTime<Utc>,
    pub learning_rate: f64,
    pub metrics: Metrics,
}

#[derive(Debug, Clone)]
pub struct EpochLog {
    path: PathBuf,
}

impl EpochLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn history_error(&self, detail: impl std::fmt::Display) -> Error {
        Error::History {
            message: format!("{}: {detail}", self.path.display()),
        }
    }

    fn reader(&self) -> Result<csv::Reader<std::fs::File>> {
        csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.history_error(e))
    }

    /// Header plus raw rows, or `None` for a missing or empty log.
    fn load(&self) -> Result<Option<(StringRecord, Vec<StringRecord>)>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut reader = self.reader()?;
        let header = reader.headers().map_err(|e| self.history_error(e))?.clone();
        if header.is_empty() {
            return Ok(None);
        }
        let rows = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.history_error(e))?;
        Ok(Some((header, rows)))
    }

    fn header(&self) -> Result<Option<Vec<String>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut reader = self.reader()?;
        let header = reader.headers().map_err(|e| self.history_error(e))?;
        if header.is_empty() {
            return Ok(None);
        }
        Ok(Some(header.iter().map(str::to_string).collect()))
    }

    /// Append one epoch row, writing the header first if the log is new.
    pub fn append(&self, epoch: usize, learning_rate: f64, metrics: &Metrics) -> Result<()> {
        let (columns, write_header) = match self.header()? {
            Some(header) => (header[FIXED_COLUMNS.len().min(header.len())..].to_vec(), false),
            None => (metrics.names().map(str::to_string).collect::<Vec<_>>(), true),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?,
        );

        if write_header {
            let mut header: Vec<&str> = FIXED_COLUMNS.to_vec();
            header.extend(columns.iter().map(String::as_str));
            writer
                .write_record(&header)
                .map_err(|e| self.history_error(e))?;
        }

        let mut row = vec![
            epoch.to_string(),
            Utc::now().to_rfc3339(),
            learning_rate.to_string(),
        ];
        row.extend(
            columns
                .iter()
                .map(|name| metrics.get(name).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&row).map_err(|e| self.history_error(e))?;
        writer.flush()?;
        Ok(())
    }

    /// Parse every row. A missing log reads as empty.
    pub fn read(&self) -> Result<Vec<EpochRecord>> {
        let Some((header, rows)) = self.load()? else {
            return Ok(Vec::new());
        };
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                parse_row(&header, row)
                    .map_err(|e| self.history_error(format!("row {}: {e}", index + 1)))
            })
            .collect()
    }

    /// Drop every row with `epoch >= from`, keeping the header.
    ///
    /// Used on resume so epochs replayed after a crash are not logged twice.
    pub fn truncate_from(&self, from: usize) -> Result<usize> {
        let Some((header, rows)) = self.load()? else {
            return Ok(0);
        };
        let (kept, dropped): (Vec<_>, Vec<_>) = rows.into_iter().partition(|row| {
            row.get(0)
                .and_then(|cell| cell.trim().parse::<usize>().ok())
                .is_some_and(|epoch| epoch < from)
        });
        if dropped.is_empty() {
            return Ok(0);
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(Vec::new());
        for record in std::iter::once(&header).chain(&kept) {
            writer
                .write_record(record)
                .map_err(|e| self.history_error(e))?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| self.history_error(e.error()))?;
        atomic_write(&self.path, &data)?;
        tracing::debug!(path = %self.path.display(), from, dropped = dropped.len(), "Truncated epoch log");
        Ok(dropped.len())
    }
}

fn parse_row(header: &StringRecord, row: &StringRecord) -> std::result::Result<EpochRecord, String> {
    if row.len() < FIXED_COLUMNS.len() {
        return Err(format!("expected at least {} columns", FIXED_COLUMNS.len()));
    }
    let epoch = row[0]
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("bad epoch '{}': {e}", &row[0]))?;
    let timestamp = DateTime::parse_from_rfc3339(row[1].trim())
        .map_err(|e| format!("bad timestamp '{}': {e}", &row[1]))?
        .with_timezone(&Utc);
    let learning_rate = row[2]
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad lr '{}': {e}", &row[2]))?;

    let mut metrics = Metrics::new();
    for (name, cell) in header.iter().zip(row.iter()).skip(FIXED_COLUMNS.len()) {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        let value = cell
            .parse::<f64>()
            .map_err(|e| format!("bad value for '{name}': {e}"))?;
        metrics.insert(name, value);
    }

    Ok(EpochRecord {
        epoch,
        timestamp,
        learning_rate,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = EpochLog::new(dir.path().join("log.csv"));
        log.append(0, 0.01, &Metrics::new().with("loss", 1.0).with("val_loss", 1.5))
            .unwrap();
        log.append(1, 0.001, &Metrics::new().with("loss", 0.5)).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.starts_with("epoch,timestamp,lr,loss,val_loss\n"));

        let records = log.read().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metrics.get("val_loss"), Some(1.5));
        assert_eq!(records[1].learning_rate, 0.001);
        assert_eq!(records[1].metrics.get("val_loss"), None);
        assert_eq!(records[1].metrics.get("loss"), Some(0.5));
    }

    #[test]
    fn test_truncate_from() {
        let dir = TempDir::new().unwrap();
        let log = EpochLog::new(dir.path().join("log.csv"));
        for epoch in 0..5 {
            log.append(epoch, 0.1, &Metrics::new().with("loss", epoch as f64))
                .unwrap();
        }
        assert_eq!(log.truncate_from(3).unwrap(), 2);
        let epochs: Vec<usize> = log.read().unwrap().iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![0, 1, 2]);
        assert_eq!(log.truncate_from(10).unwrap(), 0);
    }

    #[test]
    fn test_metric_names_with_commas_are_quoted() {
        let dir = TempDir::new().unwrap();
        let log = EpochLog::new(dir.path().join("log.csv"));
        log.append(0, 0.1, &Metrics::new().with("loss", 1.0).with("top,5", 0.5))
            .unwrap();
        log.append(1, 0.1, &Metrics::new().with("loss", 0.8).with("top,5", 0.75))
            .unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.starts_with("epoch,timestamp,lr,loss,\"top,5\"\n"));

        let records = log.read().unwrap();
        assert_eq!(records[0].metrics, Metrics::new().with("loss", 1.0).with("top,5", 0.5));
        assert_eq!(records[1].metrics.get("top,5"), Some(0.75));

        assert_eq!(log.truncate_from(1).unwrap(), 1);
        let records = log.read().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metrics.get("top,5"), Some(0.5));
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = EpochLog::new(dir.path().join("nope.csv"));
        assert!(log.read().unwrap().is_empty());
        assert_eq!(log.truncate_from(0).unwrap(), 0);
    }
}
