//! Proofsheet worker for detached analysis jobs.
//!
//! Analysis actions only queue photos and record a job; this process claims
//! the jobs and runs the dispatcher against the inference backends. It
//! shares nothing with the CLI but the SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! proofsheet-worker              # Run in foreground
//! proofsheet-worker --once       # Drain pending jobs once and exit
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use proofsheet::config::Config;
use proofsheet::db::Database;
use proofsheet::logging;
use proofsheet::vision::HttpMetricsClient;
use proofsheet::worker::{run_pending, Backends};

/// Worker command line
#[derive(Default)]
struct WorkerArgs {
    /// Poll interval override (seconds)
    poll_interval: Option<u64>,
    /// Run once and exit
    once: bool,
    /// Config path override
    config_path: Option<PathBuf>,
}

fn parse_args() -> WorkerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = WorkerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                config.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        config.poll_interval = Some(interval);
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn print_help() {
    println!(
        r#"proofsheet-worker - Background analysis worker for Proofsheet

USAGE:
    proofsheet-worker [OPTIONS]

OPTIONS:
    --once, -1          Drain pending jobs once and exit
    --interval, -i N    Poll interval in seconds (default: [worker] poll_interval_secs)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    PROOFSHEET_CONFIG   Path to config file (overrides default location)
    PROOFSHEET_LOG      Log level (trace, debug, info, warn, error)

Jobs whose worker disappeared are handed out again once their lease
([worker] lease_secs) expires, up to [worker] max_attempts times."#
    );
}

/// One poll: requeue expired leases and drain the queue on a blocking thread.
async fn run_cycle(
    db_path: &Path,
    backends: Arc<Backends>,
    lease: chrono::Duration,
    max_attempts: u32,
) -> Result<usize> {
    let db_path = db_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let db = Database::open(&db_path)?;
        run_pending(&db, &backends, lease, max_attempts)
    })
    .await
    .context("Worker cycle panicked")?
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    info!("Proofsheet worker starting...");

    let config = match args.config_path {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db_path = config.db_path.clone();
    Database::open(&db_path)?.initialize()?;
    info!(path = %db_path.display(), "Database ready");

    if HttpMetricsClient::from_config(&config.metrics).health() {
        info!(endpoint = %config.metrics.endpoint, "Metrics backend reachable");
    } else {
        warn!(endpoint = %config.metrics.endpoint, "Metrics backend not answering health checks");
    }

    let backends = Arc::new(Backends::from_config(&config));
    let lease = chrono::Duration::seconds(config.worker.lease_secs as i64);
    let max_attempts = config.worker.max_attempts;

    if args.once {
        info!("Running in single-shot mode");
        let ran = run_cycle(&db_path, backends, lease, max_attempts).await?;
        info!(jobs = ran, "Queue drained");
        return Ok(());
    }

    let interval = args
        .poll_interval
        .unwrap_or(config.worker.poll_interval_secs)
        .max(1);
    info!("Running in worker mode, polling every {} seconds", interval);

    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    loop {
        // A cycle in progress is finished before shutdown is noticed
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                match run_cycle(&db_path, Arc::clone(&backends), lease, max_attempts).await {
                    Ok(0) => {}
                    Ok(ran) => info!(jobs = ran, "Processed analysis jobs"),
                    Err(e) => error!(error = %e, "Error processing jobs"),
                }
            }
        }
    }

    info!("Proofsheet worker stopped");
    Ok(())
}
