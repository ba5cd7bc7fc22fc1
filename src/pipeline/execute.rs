//! Execution stage: the long-running copy/compress/prune phase.
//!
//! Runs on a blocking worker thread, fully decoupled from the live system.
//! Per-target failures are logged and recorded but never stop the job:
//! retention and the completion signal run even after a degraded run, so the
//! host can never end up stuck paused behind a broken backup.

use crate::config::BackupConfig;
use crate::fs::{archive, tree};
use crate::pipeline::job::{BackupJobSpec, WorkItem};
use crate::retention;
use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Name of the subtree holding manually named backups, kept apart from the
/// timestamp-named scheduled archives.
pub const CUSTOM_DIR: &str = "custom";

/// What the worker hands back over the completion channel.
#[derive(Debug, Default)]
pub(crate) struct JobOutcome {
    pub archived: usize,
    pub failed: Vec<String>,
    pub pruned: usize,
    pub duration: Duration,
}

impl JobOutcome {
    /// Placeholder outcome when the worker died without reporting.
    pub(crate) fn worker_lost() -> Self {
        Self {
            failed: vec!["backup worker".to_string()],
            ..Self::default()
        }
    }
}

/// Drain the work queue, archive every item, prune old archives, then signal
/// completion. Never panics on I/O trouble; every failure lands in the
/// outcome.
pub(crate) fn run(
    config: Arc<BackupConfig>,
    spec: BackupJobSpec,
    mut queue: mpsc::UnboundedReceiver<WorkItem>,
    done: oneshot::Sender<JobOutcome>,
) {
    let started = Instant::now();
    let mut outcome = JobOutcome::default();
    let timestamp = config.format_timestamp(Local::now());
    let root = config.backup_dir.clone();

    if let Err(e) = std::fs::create_dir_all(&root) {
        error!(path = %root.display(), error = %e, "Cannot create backup root");
        while let Some(item) = queue.blocking_recv() {
            outcome.failed.push(item.name);
        }
    } else if config.single_archive {
        run_single_archive(&config, &spec, &mut queue, &root, &timestamp, &mut outcome);
    } else {
        run_per_target(&config, &mut queue, &root, &timestamp, &mut outcome);
    }

    // Retention runs regardless of how the copies went; a degraded run must
    // not let archives pile up past the cap.
    match retention::prune(&root, config.max_backups) {
        Ok(pruned) => {
            outcome.pruned = pruned.deleted;
            if pruned.failed > 0 {
                warn!(
                    failed = pruned.failed,
                    "Some old backups could not be deleted; the cap is exceeded until the next run"
                );
            }
        }
        Err(e) => error!(error = %e, "Retention pruning failed"),
    }

    outcome.duration = started.elapsed();
    info!(
        archived = outcome.archived,
        failed = outcome.failed.len(),
        pruned = outcome.pruned,
        "Backup worker finished"
    );
    // The receiver only disappears if the whole runtime is going away.
    let _ = done.send(outcome);
}

/// One destination directory for the whole job, archived in place when
/// compression is on.
fn run_single_archive(
    config: &BackupConfig,
    spec: &BackupJobSpec,
    queue: &mut mpsc::UnboundedReceiver<WorkItem>,
    root: &Path,
    timestamp: &str,
    outcome: &mut JobOutcome,
) {
    let dest = match &spec.name {
        Some(name) => root.join(CUSTOM_DIR).join(format!("{name}{timestamp}")),
        None => root.join(timestamp),
    };
    if let Err(e) = std::fs::create_dir_all(&dest) {
        error!(path = %dest.display(), error = %e, "Cannot create backup destination");
        while let Some(item) = queue.blocking_recv() {
            outcome.failed.push(item.name);
        }
        return;
    }

    while let Some(item) = queue.blocking_recv() {
        copy_target(&item, &dest.join(&item.name), outcome);
    }

    if config.include_aux {
        copy_aux(config, &dest.join(aux_name(config)), outcome);
    }

    if config.compress {
        compress_staging(&dest, outcome);
    }
}

/// One destination (and optionally one archive) per target, which bounds
/// peak disk usage to a single staging copy at a time.
fn run_per_target(
    config: &BackupConfig,
    queue: &mut mpsc::UnboundedReceiver<WorkItem>,
    root: &Path,
    timestamp: &str,
    outcome: &mut JobOutcome,
) {
    while let Some(item) = queue.blocking_recv() {
        let dest = root.join(format!("{}-{}", item.name, timestamp));
        copy_target(&item, &dest, outcome);
        if config.compress && dest.is_dir() {
            compress_staging(&dest, outcome);
        }
    }

    if config.include_aux {
        let dest = root.join(format!("{}-{}", aux_name(config), timestamp));
        copy_aux(config, &dest, outcome);
        if config.compress && dest.is_dir() {
            compress_staging(&dest, outcome);
        }
    }
}

fn copy_target(item: &WorkItem, dest: &Path, outcome: &mut JobOutcome) {
    match tree::copy_tree(&item.path, dest) {
        Ok(stats) => {
            outcome.archived += 1;
            if stats.is_partial() {
                warn!(
                    target = %item.name,
                    failed = stats.failed,
                    "Backup of target is incomplete, please take a look at it"
                );
                outcome.failed.push(item.name.clone());
            }
        }
        Err(e) => {
            error!(target = %item.name, error = %e, "Failed to back up target");
            outcome.failed.push(item.name.clone());
        }
    }
}

fn copy_aux(config: &BackupConfig, dest: &Path, outcome: &mut JobOutcome) {
    match tree::copy_tree(&config.aux_dir, dest) {
        Ok(stats) if !stats.is_partial() => {}
        Ok(stats) => {
            warn!(failed = stats.failed, "Auxiliary data copied incompletely");
            outcome.failed.push(aux_name(config).to_string());
        }
        Err(e) => {
            warn!(error = %e, "Failed to copy auxiliary data");
            outcome.failed.push(aux_name(config).to_string());
        }
    }
}

/// Archive a staging directory next to itself and delete the uncompressed
/// copy on success.
fn compress_staging(staging: &Path, outcome: &mut JobOutcome) {
    match archive::archive_dir(staging, staging) {
        Ok(path) => {
            info!(archive = %path.display(), "Created backup archive");
            if let Err(e) = tree::delete_tree(staging) {
                warn!(path = %staging.display(), error = %e, "Staging copy left behind after compression");
            }
        }
        Err(e) => {
            error!(path = %staging.display(), error = %e, "Compression failed, keeping the uncompressed copy");
            outcome
                .failed
                .push(staging.file_name().map_or_else(
                    || staging.display().to_string(),
                    |n| n.to_string_lossy().into_owned(),
                ));
        }
    }
}

fn aux_name(config: &BackupConfig) -> &str {
    config
        .aux_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("aux")
}
