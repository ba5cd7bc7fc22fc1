//! world-keeper - Main entry point
//!
//! Runs the backup pipeline against plain directories: periodically on a
//! configured interval, or once with `--now`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use world_keeper::pipeline::Phase;
use world_keeper::{triggers, utils, BackupConfig, DirectoryHost, PipelineController, Target};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "world-keeper.conf")]
    config: PathBuf,

    /// Backup target as name=path (repeatable)
    #[arg(short, long, value_name = "NAME=PATH")]
    target: Vec<String>,

    /// Backup root directory (overrides config)
    #[arg(short, long)]
    backup_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single backup immediately and exit
    #[arg(long)]
    now: bool,

    /// Custom archive name for --now (stored under the custom/ namespace)
    #[arg(long, requires = "now")]
    name: Option<String>,
}

fn parse_targets(raw: &[String]) -> Result<Vec<Target>> {
    let mut targets = Vec::with_capacity(raw.len());
    for spec in raw {
        let Some((name, path)) = spec.split_once('=') else {
            bail!("invalid target '{spec}', expected name=path");
        };
        targets.push(Target {
            name: name.to_string(),
            path: PathBuf::from(path),
        });
    }
    Ok(targets)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::logger::init(&args.log_level)?;

    let mut config = BackupConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    if let Some(dir) = args.backup_dir {
        config.backup_dir = dir;
    }

    let targets = parse_targets(&args.target)?;
    if targets.is_empty() {
        bail!("no targets given; pass at least one --target name=path");
    }

    tracing::info!(
        "Starting world-keeper v{} ({} targets, backup root {})",
        env!("CARGO_PKG_VERSION"),
        targets.len(),
        config.backup_dir.display()
    );

    let interval = config.interval();
    let host = Arc::new(DirectoryHost::new(targets));
    let controller = PipelineController::new(host, Arc::new(config));

    if args.now {
        let handle = controller.start_manual(args.name).await?;
        let report = handle.await.context("backup task panicked")?;
        tracing::info!(
            archived = report.archived,
            pruned = report.pruned,
            degraded = report.is_degraded(),
            "Backup finished in {:.1}s",
            report.duration.as_secs_f64()
        );
        if report.is_degraded() {
            bail!("backup finished degraded: {:?}", report.failed);
        }
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler = tokio::spawn(triggers::run_scheduler(
        controller.clone(),
        interval,
        shutdown_tx.subscribe(),
    ));

    wait_for_signal().await;
    let _ = shutdown_tx.send(());
    let _ = scheduler.await;

    // No cancellation mid-job: a shutdown waits for any in-flight backup so
    // the archive on disk is never truncated.
    if controller.state().phase().await != Phase::Idle {
        tracing::info!("Waiting for the in-flight backup to finish...");
        while controller.state().phase().await != Phase::Idle {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
