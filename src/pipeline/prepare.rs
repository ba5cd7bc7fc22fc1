//! Preparation stage: the short, synchronous "freeze & enumerate" phase.
//!
//! Runs on the execution context that is serialized with live-data mutation
//! and performs no archive I/O, so the live system is only briefly held up.
//! Output is the populated work queue handed to the execution stage.

use crate::config::BackupConfig;
use crate::host::LiveDataHost;
use crate::pipeline::job::{BackupJobSpec, WorkItem};
use crate::pipeline::PipelineError;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

pub(crate) struct Prepared {
    /// Autosave was paused and must be resumed by the completion callback
    pub paused: bool,

    /// Work items enqueued
    pub queued: usize,
}

/// Flush, pause, filter and enqueue. Fatal only when pausing autosave fails;
/// everything else is best-effort.
pub(crate) fn run<H: LiveDataHost>(
    host: &H,
    config: &BackupConfig,
    spec: &BackupJobSpec,
    queue: &UnboundedSender<WorkItem>,
) -> Result<Prepared, PipelineError> {
    if !config.start_message.trim().is_empty() {
        info!("{}", config.start_message);
        host.broadcast(&config.start_message);
    }

    // The snapshot is only consistent if in-memory state reaches the disk
    // before any copying starts.
    if let Err(e) = host.flush_all() {
        warn!(error = %e, "Host-wide flush failed, continuing with a best-effort snapshot");
    }

    let mut paused = false;
    if config.pause_autosave {
        // Copying while the host keeps flushing would corrupt the snapshot,
        // so a pause failure aborts the job before anything is enqueued.
        host.pause_autosave().map_err(PipelineError::PauseFailed)?;
        paused = true;
    }

    if !config.excluded_targets.is_empty() {
        info!(excluded = ?config.excluded_targets, "Backup is disabled for these targets");
    }
    if !config.compress {
        info!("Backup compression is disabled");
    }

    let mut queued = 0;
    for target in host.targets() {
        let excluded = config
            .excluded_targets
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&target.name));
        if excluded {
            continue;
        }

        if let Err(e) = host.flush(&target.name) {
            // Best-effort: an unflushed target still gets backed up, it may
            // just be slightly stale.
            warn!(target = %target.name, error = %e, "Flushing target failed, backing it up anyway");
        }

        if queue
            .send(WorkItem {
                name: target.name,
                path: target.path,
            })
            .is_ok()
        {
            queued += 1;
        }
    }

    info!(reason = ?spec.reason, queued, "Backup job prepared");
    Ok(Prepared { paused, queued })
}
