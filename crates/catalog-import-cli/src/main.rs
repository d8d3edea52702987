//! catalog-import CLI - loads CSV catalog feeds into the PostgreSQL staging table.

mod logging;

use catalog_import::{
    Config, ImportError, LoadMode, Orchestrator, PgTarget, RunStatus, StagingTarget,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "catalog-import")]
#[command(about = "Load CSV catalog feeds into a PostgreSQL staging table")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (environment variables when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the per-run log file (overrides logging.dir / LOG_DIR)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log verbosity: debug, info, warn, error (overrides logging.level / LOG_LEVEL)
    #[arg(long)]
    verbosity: Option<String>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reset the staging table and load every feed file
    Run {
        /// Override the directory scanned for *.csv feeds
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Override rows per COPY batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override number of files loaded concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Override load mode: best_effort or per_file
        #[arg(long)]
        load_mode: Option<String>,

        /// Exit non-zero when any file failed to load
        #[arg(long)]
        fail_on_file_error: bool,
    },

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), ImportError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    if let Some(dir) = &cli.log_dir {
        config.logging.dir = dir.clone();
    }
    if let Some(level) = &cli.verbosity {
        config.logging.level = level.clone();
    }

    if let Commands::Run {
        input_dir,
        batch_size,
        workers,
        load_mode,
        fail_on_file_error,
    } = &cli.command
    {
        if let Some(dir) = input_dir {
            config.import.input_dir = dir.clone();
        }
        if let Some(size) = batch_size {
            config.import.batch_size = *size;
        }
        if let Some(w) = workers {
            config.import.workers = *w;
        }
        if let Some(mode) = load_mode {
            config.import.load_mode = LoadMode::parse(mode).ok_or_else(|| {
                ImportError::Config(format!(
                    "--load-mode must be 'best_effort' or 'per_file', got '{}'",
                    mode
                ))
            })?;
        }
        if *fail_on_file_error {
            config.import.fail_on_file_error = true;
        }
        config.validate()?;
    }

    let (log_path, _log_guard) =
        logging::setup_logging(&config.logging.dir, &config.logging.level)
            .map_err(ImportError::Config)?;
    info!("Logging to {}", log_path.display());

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler();

    match cli.command {
        Commands::Run { .. } => {
            let fail_on_file_error = config.import.fail_on_file_error;
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                let status_msg = match report.status {
                    RunStatus::Completed => "Import completed!",
                    RunStatus::Cancelled => "Import cancelled!",
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!("  Load mode: {}", report.load_mode);
                println!(
                    "  Files: {}/{} loaded, {} failed",
                    report.files_loaded, report.files_total, report.files_failed
                );
                println!("  Rows committed: {}", report.rows_committed);
                if let Some(staged) = report.staged_rows {
                    println!("  Rows in staging table: {}", staged);
                }
                let failed = report.failed_files();
                if !failed.is_empty() {
                    println!("  Failed files: {:?}", failed);
                }
            }

            if let Some(e) = report.exit_error(fail_on_file_error) {
                return Err(e);
            }
        }

        Commands::HealthCheck => {
            let (connected, latency_ms, error) = match PgTarget::new(&config.database, 1).await {
                Ok(target) => match target.health_check().await {
                    Ok(latency) => (true, latency.as_millis() as u64, None),
                    Err(e) => (false, 0, Some(e)),
                },
                Err(e) => (false, 0, Some(e)),
            };

            if cli.output_json {
                let result = serde_json::json!({
                    "healthy": connected,
                    "database": format!(
                        "{}:{}/{}",
                        config.database.host, config.database.port, config.database.database
                    ),
                    "latency_ms": latency_ms,
                    "error": error.as_ref().map(|e| e.to_string()),
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  PostgreSQL {}:{}/{}: {} ({}ms)",
                    config.database.host,
                    config.database.port,
                    config.database.database,
                    if connected { "OK" } else { "FAILED" },
                    latency_ms
                );
                if let Some(ref err) = error {
                    println!("    Error: {}", err);
                }
            }

            if let Some(e) = error {
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            warn!("Received {}. Finishing the current batch and stopping...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        warn!("Received Ctrl-C. Finishing the current batch and stopping...");
        token.cancel();
    });

    cancel_token
}
