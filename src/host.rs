//! The seam to the process that owns the live, mutable data.
//!
//! The pipeline never touches live state directly; everything goes through
//! [`LiveDataHost`]. The host's own mutation logic and the pipeline's
//! synchronous phase are serialized on the same execution context.

use crate::utils::errors::Result;
use std::path::PathBuf;
use tracing::{debug, info};

/// One live data directory subject to backup.
#[derive(Debug, Clone)]
pub struct Target {
    /// Logical name, also used in archive naming
    pub name: String,

    /// Source directory on disk
    pub path: PathBuf,
}

/// Operations the live-data owner exposes to the backup pipeline.
pub trait LiveDataHost: Send + Sync + 'static {
    /// Enumerate the live targets in a stable order.
    fn targets(&self) -> Vec<Target>;

    /// Flush all in-memory state to disk. Blocking; the snapshot depends
    /// on it.
    fn flush_all(&self) -> Result<()>;

    /// Flush a single target to disk.
    fn flush(&self, name: &str) -> Result<()>;

    /// Stop autonomous flushing/mutation until resumed. Idempotent.
    fn pause_autosave(&self) -> Result<()>;

    /// Re-enable autonomous flushing/mutation. Idempotent.
    fn resume_autosave(&self) -> Result<()>;

    /// Surface a message to whoever is connected to the live system.
    fn broadcast(&self, message: &str);

    /// Number of currently connected participants.
    fn participant_count(&self) -> usize;
}

/// A plain filesystem-backed host: targets are just directories, flushes are
/// no-ops and broadcasts go to the log. Used by the binary and in tests.
pub struct DirectoryHost {
    targets: Vec<Target>,
}

impl DirectoryHost {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }
}

impl LiveDataHost for DirectoryHost {
    fn targets(&self) -> Vec<Target> {
        self.targets.clone()
    }

    fn flush_all(&self) -> Result<()> {
        debug!("DirectoryHost has no in-memory state to flush");
        Ok(())
    }

    fn flush(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn pause_autosave(&self) -> Result<()> {
        Ok(())
    }

    fn resume_autosave(&self) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, message: &str) {
        info!("{message}");
    }

    fn participant_count(&self) -> usize {
        0
    }
}
