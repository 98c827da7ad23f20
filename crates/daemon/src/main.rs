//! ADSync daemon entry point.
//!
//! Loads configuration, opens the database, builds one sync engine per
//! profile and runs them on the configured interval until a shutdown
//! signal arrives.

mod scheduler;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use adsync_core::config::{AppConfig, DaemonConfig};
use adsync_core::directory::LdapConnector;
use adsync_core::sync_engine::SyncEngine;
use adsync_core::Runtime;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// ADSync synchronization daemon.
#[derive(Parser, Debug)]
#[command(
    name = "adsync-daemon",
    version,
    about = "Active Directory to identity store synchronization daemon"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Run every profile once and exit.
    #[arg(long, conflicts_with = "verify")]
    once: bool,

    /// Check connection and service-account bind for every profile, then exit.
    #[arg(long)]
    verify: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::load_and_resolve(&args.config).context("failed to load configuration")?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.daemon.log_level);
    let _log_guard = init_tracing(log_level, &config.daemon)?;

    info!("========================================");
    info!("  ADSync Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Profiles      : {}", config.profiles.len());
    info!("Poll interval : {}s", config.daemon.poll_interval_secs);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    let Runtime { db, db_path, engines } =
        Runtime::open(&config, Arc::new(LdapConnector::default())).context("failed to start runtime")?;
    info!("Database initialized at {}", db_path.display());

    if args.verify {
        return verify(&engines).await;
    }

    let poll_interval = Duration::from_secs(config.daemon.poll_interval_secs);
    let sched = Arc::new(scheduler::Scheduler::new(engines, db, poll_interval));

    if args.once {
        if !sched.run_once().await {
            bail!("one or more sync runs failed");
        }
        info!("single round completed");
        return Ok(());
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let scheduler_handle = {
        let sched = sched.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { sched.run(shutdown).await })
    };

    signals::wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");

    // notify_one keeps a permit if the scheduler is mid-round.
    shutdown.notify_one();

    match tokio::time::timeout(Duration::from_secs(30), scheduler_handle).await {
        Ok(Ok(())) => info!("scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 30s, forcing shutdown"),
    }

    info!("ADSync daemon stopped.");
    Ok(())
}

/// Console output always; a daily rolling file too when `log_dir` is set.
fn init_tracing(log_level: &str, daemon: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &daemon.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "adsync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn verify(engines: &[Arc<SyncEngine>]) -> Result<()> {
    let mut failed = 0;
    for engine in engines {
        let profile = &engine.profile().name;
        match engine.verify_connection().await {
            Ok(base_dn) => info!(profile = %profile, base_dn = %base_dn, "connection verified"),
            Err(e) => {
                failed += 1;
                error!(profile = %profile, error = %e, "connection check failed");
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} profiles failed the connection check", failed, engines.len());
    }
    Ok(())
}
