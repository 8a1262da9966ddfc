//! wozmap-harvest - Main entry point
//!
//! Harvests the WOZ valuation history of every address in the input list into the
//! wide Parquet dataset. Re-running the same command resumes from the checkpoint.
//!
//! Exit codes: 0 when the full list has been attempted, 1 on a fatal error, 130 when
//! stopped by SIGINT/SIGTERM after the gathered progress was persisted.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wozmap_common::config::LoggingConfig;
use wozmap_harvest::config::{CliOverrides, HarvestConfig};
use wozmap_harvest::workflow::RunStatus;

const EXIT_FATAL: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

/// Command-line arguments for wozmap-harvest
#[derive(Parser, Debug)]
#[command(name = "wozmap-harvest")]
#[command(about = "Harvest historical WOZ valuations into a wide Parquet dataset")]
#[command(version)]
struct Args {
    /// Address list (.csv or .parquet)
    #[arg(short, long)]
    input: PathBuf,

    /// Output dataset (default: <root folder>/woz_history.parquet)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Checkpoint file (default: harvest-checkpoint.json next to the output)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Outbound requests per second, shared by all workers
    #[arg(long, env = "WOZMAP_RATE_LIMIT")]
    rate_limit: Option<u32>,

    /// Addresses per dataset flush and checkpoint save
    #[arg(long, env = "WOZMAP_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Concurrent address workers
    #[arg(long, env = "WOZMAP_WORKERS")]
    workers: Option<usize>,

    /// Resume from the checkpoint (false: start from the first address)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    resume: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data root folder
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            input: self.input.clone(),
            output: self.output.clone(),
            checkpoint: self.checkpoint.clone(),
            rate_limit: self.rate_limit,
            batch_size: self.batch_size,
            workers: self.workers,
            resume: self.resume,
            config: self.config.clone(),
            root_folder: self.root_folder.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match HarvestConfig::load(&args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wozmap-harvest: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("wozmap-harvest: {:#}", e);
        return ExitCode::from(EXIT_FATAL);
    }

    match run(config).await {
        Ok(RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(RunStatus::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!("Harvest aborted: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(config: HarvestConfig) -> Result<RunStatus> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        root_folder = %config.root_folder.display(),
        "Starting wozmap-harvest"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let report = wozmap_harvest::run_harvest(&config, cancel)
        .await
        .context("Harvest failed")?;

    info!(
        report = %serde_json::to_string(&report).unwrap_or_default(),
        "Final report"
    );
    println!("{}", report);
    Ok(report.status)
}

/// RUST_LOG wins over the configured level; optional file output
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level '{}'", logging.level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Cancel on SIGINT/SIGTERM; a second Ctrl+C exits immediately
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing in-flight addresses and saving progress");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing in-flight addresses and saving progress");
        },
    }
    cancel.cancel();

    if signal::ctrl_c().await.is_ok() {
        warn!("Second Ctrl+C, exiting without saving progress of the current batch");
        std::process::exit(i32::from(EXIT_INTERRUPTED));
    }
}
