//! Driveup CLI - back up a local directory to Google Drive.
//!
//! Every run uploads the regular files of one directory into a new,
//! timestamped Drive folder.

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use driveup_common::folder_name;
use driveup_storage::Authenticator;
use driveup_upload::{has_files, Uploader};

use crate::config::UploadConfig;

/// How a run ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    /// Every file was uploaded.
    Complete,
    /// The directory holds no files; nothing was contacted.
    NothingToUpload,
    /// The run finished but some files failed.
    Partial,
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Complete | RunStatus::NothingToUpload => ExitCode::SUCCESS,
            RunStatus::Partial => ExitCode::from(2),
        }
    }
}

/// Base name used when the directory has no name of its own (e.g. `/`).
const FALLBACK_BASE: &str = "backup";

#[derive(Parser)]
#[command(name = "driveup")]
#[command(about = "Driveup - Back up a directory to Google Drive")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a directory into a new timestamped Drive folder.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub(crate) struct RunArgs {
    /// Directory to back up.
    #[arg(short, long)]
    directory: PathBuf,

    /// Base name of the Drive folder (default: the directory name).
    #[arg(short, long)]
    name: Option<String>,

    /// Drive folder id to create the backup folder in (default: My Drive).
    #[arg(long)]
    parent: Option<String>,

    /// OAuth client secrets file.
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Token file.
    #[arg(long)]
    token: Option<PathBuf>,

    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Total attempts per file, the first one included.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay before the first retry, in milliseconds.
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Wait the same delay before every retry instead of backing off.
    #[arg(long)]
    fixed_delay: bool,

    /// Mirror subdirectories as Drive subfolders.
    #[arg(long)]
    preserve_structure: bool,

    /// Follow symbolic links while walking the directory.
    #[arg(long)]
    follow_links: bool,

    /// Fail instead of starting the browser authorization flow.
    #[arg(long)]
    no_browser: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("info,driveup=debug,driveup_common=debug,driveup_storage=debug,driveup_upload=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args).await,
    };

    match result {
        Ok(status) => status.into(),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Back up one directory.
async fn cmd_run(args: RunArgs) -> Result<RunStatus> {
    let started = Instant::now();

    let config = UploadConfig::load(args.config.as_deref())?.with_overrides(&args);
    config.validate().context("Invalid configuration")?;

    let directory = &args.directory;
    if !has_files(directory, &config.uploader.walk)? {
        warn!(
            "No files found in '{}'. Nothing to upload",
            directory.display()
        );
        return Ok(RunStatus::NothingToUpload);
    }

    let base = match &args.name {
        Some(name) => name.clone(),
        None => base_name(directory)?,
    };
    let folder = folder_name(&base)?;

    info!("Authenticating with Google Drive");
    let authenticator = Authenticator::new(&config.credentials, &config.token)
        .with_interactive(config.interactive)
        .with_request_timeout(config.request_timeout());
    let session = authenticator
        .authenticate(|url| {
            println!("Open this URL in your browser to authorize access:\n\n    {}\n", url);
            if let Err(e) = open::that(url) {
                warn!("Could not open a browser: {}", e);
            }
        })
        .await
        .context("Authentication failed")?;

    let uploader = Uploader::new(Arc::new(session), config.uploader)?;

    info!("Uploading '{}' to '{}'", directory.display(), folder);
    let summary = uploader
        .run(directory, &folder)
        .await
        .context("Backup aborted")?;

    info!("Completed in {:.2?}", started.elapsed());

    if summary.is_success() {
        Ok(RunStatus::Complete)
    } else {
        Ok(RunStatus::Partial)
    }
}

/// Name of the directory itself, resolving `.` and `..`.
fn base_name(directory: &Path) -> Result<String> {
    let resolved = std::fs::canonicalize(directory)
        .with_context(|| format!("Failed to resolve {}", directory.display()))?;

    Ok(resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_BASE.to_string()))
}
