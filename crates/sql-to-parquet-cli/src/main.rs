//! sql-to-parquet CLI - export SQL Server tables and views to Parquet files.

mod summary;

use clap::{Parser, Subcommand};
use sql_to_parquet::core::resolve;
use sql_to_parquet::{
    Config, ExportError, ExportTarget, LoggingLevel, MssqlDialect, MssqlReader, Orchestrator,
    RunSettings,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sql-to-parquet")]
#[command(about = "Export SQL Server tables and views to Parquet files")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity, overriding the config: errors_only, summary, verbose, debug
    #[arg(long)]
    verbosity: Option<LoggingLevel>,

    /// Seconds to wait for in-flight objects after SIGINT/SIGTERM
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export every configured object
    Run {
        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Dry run: resolve objects and show the queries without connecting
        #[arg(long)]
        dry_run: bool,
    },

    /// Test the source connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, ExportError> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let level = cli.verbosity.unwrap_or_else(|| config.logging_level());
    setup_logging(level, &cli.log_format);
    info!("Loaded configuration from {:?}", cli.config);

    let mut settings = config.run_settings();

    match cli.command {
        Commands::Run { workers, dry_run } => {
            if let Some(w) = workers {
                if w == 0 {
                    return Err(ExportError::Config("--workers must be at least 1".into()));
                }
                settings.workers = w;
            }

            let targets = config.targets();
            if dry_run {
                return dry_run_plan(&targets, &settings);
            }

            let cancel_token = setup_signal_handler();
            let reader = MssqlReader::connect(&config.source_spec()?, settings.workers as u32).await?;
            let orchestrator = Orchestrator::new(Arc::new(reader));

            let export = orchestrator.run(targets, &settings, cancel_token.clone());
            let grace = Duration::from_secs(cli.shutdown_timeout);
            let result = tokio::select! {
                result = export => result,
                _ = async {
                    cancel_token.cancelled().await;
                    tokio::time::sleep(grace).await;
                } => {
                    warn!("Shutdown timeout of {}s elapsed, abandoning in-flight objects", cli.shutdown_timeout);
                    Err(ExportError::Cancelled)
                }
            };
            orchestrator.close().await;
            let summary = result?;

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                print!("{}", summary::render(&summary, level.shows_summary()));
            }

            if summary.all_succeeded() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }

        Commands::HealthCheck => {
            let reader = MssqlReader::connect(&config.source_spec()?, 1).await?;
            let orchestrator = Orchestrator::new(Arc::new(reader));
            let result = orchestrator.health_check().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MSSQL): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if result.healthy {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }
    }
}

/// Print what a run would do. Exits non-zero if any object would fail to
/// resolve.
fn dry_run_plan(targets: &[ExportTarget], settings: &RunSettings) -> Result<ExitCode, ExportError> {
    if targets.is_empty() {
        return Err(ExportError::NoTargets);
    }

    let dialect = MssqlDialect::new();
    let mut invalid = 0;

    println!(
        "Dry run: {} objects, batch size {}, {} worker(s)",
        targets.len(),
        settings.batch_size,
        settings.workers
    );
    for target in targets {
        let planned = resolve(&target.object_ref, &settings.default_schema).and_then(|object| {
            let sql = dialect.build_select(&object, target.filter.as_deref(), &[])?;
            Ok((object, sql))
        });
        match planned {
            Ok((object, sql)) => {
                println!("  {} -> {}", target.name, object);
                println!("    {}", sql);
                println!("    => {}", settings.output_path(&target.name).display());
            }
            Err(e) => {
                invalid += 1;
                println!("  {} -> ERROR: {}", target.name, e);
            }
        }
    }
    println!("\nPrimary key ordering is added at run time when the object has one.");

    if invalid == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn setup_logging(level: LoggingLevel, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
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
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Shutting down gracefully...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    cancel_token
}
