//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use anyhow::Context;
use rekindle_core::cancel::CancellationFile;
use rekindle_core::checkpoint::CheckpointState;
use rekindle_core::config::RekindleConfig;
use rekindle_core::job::JobSummary;
use rekindle_core::layout::JobLayout;
use rekindle_core::schedule::Schedule;
use rekindle_core::snapshot::{Lineage, SnapshotKey, SnapshotStore};
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config: &RekindleConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Status { dir } => handle_status(&dir, config),
        Commands::List { root } => handle_list(root.as_deref().unwrap_or(config.storage.root.as_path()), config),
        Commands::Inspect { dir, lineage } => handle_inspect(&dir, lineage.as_deref(), config),
        Commands::Cancel { file } => handle_cancel(file, config),
        Commands::Delete { dir, keep_history } => handle_delete(&dir, keep_history),
        Commands::Config { action } => handle_config(action, workspace, config),
    }
}

/// Canonical workspace path; a missing or non-directory path is an error.
pub(crate) fn resolve_workspace(path: &Path) -> anyhow::Result<PathBuf> {
    if !path.is_dir() {
        anyhow::bail!("Workspace is not a directory: {}", path.display());
    }
    path.canonicalize()
        .with_context(|| format!("Cannot resolve workspace {}", path.display()))
}

fn require_job_dir(dir: &Path) -> anyhow::Result<()> {
    if !is_job_dir(dir) {
        anyhow::bail!("Not a job directory: {}", dir.display());
    }
    Ok(())
}

/// A job directory holds a status file or a committed lineage.
pub(crate) fn is_job_dir(dir: &Path) -> bool {
    let layout = JobLayout::new(dir);
    layout.status_path().is_file()
        || Lineage::ALL
            .iter()
            .any(|lineage| layout.lineage_dir(*lineage).is_dir())
}

/// Every job directory under `root`, sorted.
pub(crate) fn find_jobs(root: &Path) -> Vec<PathBuf> {
    let mut jobs: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(3)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir() && is_job_dir(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    jobs.sort();
    jobs
}

fn handle_status(dir: &Path, config: &RekindleConfig) -> anyhow::Result<()> {
    require_job_dir(dir)?;
    let summary = JobSummary::read(dir, &config.storage.weights_extension)?;
    println!("{}", summary.status);
    Ok(())
}

fn format_epochs(epochs: Option<usize>) -> String {
    epochs.map_or_else(|| "-".to_string(), |e| e.to_string())
}

fn handle_list(root: &Path, config: &RekindleConfig) -> anyhow::Result<()> {
    if !root.exists() {
        println!("No jobs under {}", root.display());
        return Ok(());
    }
    let jobs = find_jobs(root);
    if jobs.is_empty() {
        println!("No jobs under {}", root.display());
        return Ok(());
    }

    println!(
        "{:<56} {:<14} {:>7} {:>7} {:>12}",
        "JOB", "STATUS", "LATEST", "BEST", "BEST VALUE"
    );
    for dir in jobs {
        let name = dir.strip_prefix(root).unwrap_or(&dir).display().to_string();
        match JobSummary::read(&dir, &config.storage.weights_extension) {
            Ok(summary) => println!(
                "{:<56} {:<14} {:>7} {:>7} {:>12}",
                name,
                summary.status.to_string(),
                format_epochs(summary.latest_epochs),
                format_epochs(summary.best_epochs),
                summary
                    .best_value
                    .map_or_else(|| "-".to_string(), |v| format!("{v:.6}")),
            ),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Unreadable job directory");
                println!("{:<56} {:<14}", name, "unreadable");
            }
        }
    }
    Ok(())
}

fn handle_inspect(
    dir: &Path,
    lineage: Option<&str>,
    config: &RekindleConfig,
) -> anyhow::Result<()> {
    require_job_dir(dir)?;
    let Some(lineage) = lineage else {
        let summary = JobSummary::read(dir, &config.storage.weights_extension)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    };

    let lineage: Lineage = lineage.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let store = SnapshotStore::new(dir, &config.storage.weights_extension);
    store
        .verify(lineage)
        .with_context(|| format!("Lineage '{lineage}' in {} is not usable", dir.display()))?;

    let counter = store.epoch(lineage)?;
    let checkpoint: CheckpointState = store.load_state(lineage, SnapshotKey::Checkpoint)?;
    let schedule: Schedule = store.load_state(lineage, SnapshotKey::Schedule)?;
    let dump = serde_json::json!({
        "lineage": lineage,
        "epochs_completed": counter.epochs_completed,
        "last_epoch": counter.last_epoch(),
        "digests": counter.digests,
        "weights": store.blob_path(lineage, SnapshotKey::Weights),
        "checkpoint": checkpoint,
        "schedule": schedule,
    });
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}

fn handle_cancel(file: Option<PathBuf>, config: &RekindleConfig) -> anyhow::Result<()> {
    let mut cancellation = config.cancellation.clone();
    if let Some(file) = file {
        cancellation.path = file;
    }
    let cancel = CancellationFile::from_config(&cancellation);
    cancel.request()?;
    println!(
        "Cancellation requested: wrote '{}' to {}",
        cancel.sentinel(),
        cancel.path().display()
    );
    Ok(())
}

fn handle_delete(dir: &Path, keep_history: bool) -> anyhow::Result<()> {
    require_job_dir(dir)?;
    JobLayout::new(dir).delete(keep_history)?;
    if keep_history {
        println!("Deleted status and logs of {} (lineages kept)", dir.display());
    } else {
        println!("Deleted {}", dir.display());
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: &RekindleConfig,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            if rekindle_core::config::workspace_config_path(workspace).exists() {
                println!(
                    "Configuration file already exists at: {}",
                    rekindle_core::config::workspace_config_path(workspace).display()
                );
                return Ok(());
            }
            let path = rekindle_core::config::write_default_config(workspace)?;
            println!("Created configuration file: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
