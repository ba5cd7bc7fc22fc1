//! Job descriptions and results flowing through the pipeline.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// What caused a job to start. One pipeline handles all three; the original
/// design's "last backup before idle" task variant collapses into a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Scheduled,
    Manual,
    IdleTriggered,
}

/// Immutable description of one backup run. Constructed by a trigger,
/// consumed exactly once by the preparation stage.
#[derive(Debug)]
pub struct BackupJobSpec {
    /// Custom archive name; present only for manual jobs, which land in the
    /// `custom/` namespace instead of among timestamp-named archives
    pub name: Option<String>,

    pub reason: TriggerReason,

    pub created_at: DateTime<Utc>,
}

impl BackupJobSpec {
    pub fn scheduled() -> Self {
        Self {
            name: None,
            reason: TriggerReason::Scheduled,
            created_at: Utc::now(),
        }
    }

    pub fn manual(name: Option<String>) -> Self {
        Self {
            name,
            reason: TriggerReason::Manual,
            created_at: Utc::now(),
        }
    }

    pub fn idle() -> Self {
        Self {
            name: None,
            reason: TriggerReason::IdleTriggered,
            created_at: Utc::now(),
        }
    }
}

/// One target queued for archiving. Created by the preparation stage,
/// consumed by the execution stage.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub name: String,
    pub path: PathBuf,
}

/// Final accounting for one completed job.
#[derive(Debug)]
pub struct JobReport {
    pub reason: TriggerReason,

    /// Targets that produced an archive entry (possibly partial)
    pub archived: usize,

    /// Targets (or archive steps) that failed; non-empty means degraded
    pub failed: Vec<String>,

    /// Old archive entries removed by retention
    pub pruned: usize,

    pub duration: Duration,

    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}
