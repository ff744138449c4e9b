//! Rekindle CLI: operator interface over persisted training jobs.
//!
//! Inspects job directories, requests cooperative cancellation, and cleans up
//! artifacts. Training itself is driven through the `rekindle-core` library.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Rekindle: resumable training checkpoint orchestration
#[derive(Parser, Debug)]
#[command(name = "rekindle", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Additional configuration file, layered over the workspace config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Print the status of a job directory
    Status {
        /// Job directory (…/{arch}-{dataset}-{loss}-{optimizer}/{budget}-{patience}/{fold})
        dir: PathBuf,
    },
    /// List every job under a storage root
    List {
        /// Storage root (defaults to the configured one)
        root: Option<PathBuf>,
    },
    /// Show a job summary, or the committed state of one lineage
    Inspect {
        dir: PathBuf,
        /// Lineage to dump: latest or best
        #[arg(short, long)]
        lineage: Option<String>,
    },
    /// Ask running jobs to stop at the next epoch boundary
    Cancel {
        /// Cancellation file (defaults to the configured one)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Delete a job's artifacts
    Delete {
        dir: PathBuf,
        /// Keep the latest and best lineages
        #[arg(long)]
        keep_history: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "rekindle", "rekindle")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "rekindle.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = commands::resolve_workspace(&cli.workspace)?;

    let config = rekindle_core::config::load_config_with_file(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?
        .rooted_at(&workspace);
    config.validate()?;

    commands::handle_command(cli.command, &workspace, &config)
}
