//! The two-phase backup pipeline.
//!
//! A job moves through an explicit state machine, Idle → Preparing →
//! Executing → Idle. The preparation stage runs on the context serialized
//! with live-data mutation and only enumerates and flushes; the execution
//! stage runs on a blocking worker and does all archive I/O. The two are
//! connected by a single-producer/single-consumer work queue, and a oneshot
//! completion channel marshals the result back to the synchronous context —
//! the only place that resumes autosave and mutates shared state, which is
//! what guarantees the host is never resumed while copying is still running.

pub mod execute;
pub mod job;
pub mod prepare;

use crate::config::BackupConfig;
use crate::host::LiveDataHost;
use crate::utils::errors::KeeperError;
use chrono::{DateTime, Utc};
use job::{BackupJobSpec, JobReport};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("a backup job is already in progress")]
    JobInProgress,

    #[error("pausing autosave failed, aborting the job: {0}")]
    PauseFailed(#[source] KeeperError),
}

/// Where the pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing,
    Executing,
}

struct StateInner {
    phase: Phase,
    last_completed: Option<DateTime<Utc>>,
}

/// Process-wide pipeline state: the "job in progress" flag as a real state
/// machine plus the completion timestamp. Single-writer by construction —
/// only job-start code and the completion callback mutate it, both on the
/// synchronous context.
pub struct PipelineState {
    inner: Mutex<StateInner>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                phase: Phase::Idle,
                last_completed: None,
            }),
        }
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }

    pub async fn last_completed(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.last_completed
    }

    /// Time since the last successful completion, if any.
    pub async fn time_since_last_backup(&self) -> Option<chrono::Duration> {
        self.inner
            .lock()
            .await
            .last_completed
            .map(|t| Utc::now() - t)
    }

    /// Claim the pipeline for a new job. Rejected outside Idle.
    pub(crate) async fn try_begin(&self) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        if inner.phase != Phase::Idle {
            return Err(PipelineError::JobInProgress);
        }
        inner.phase = Phase::Preparing;
        Ok(())
    }

    pub(crate) async fn mark_executing(&self) {
        self.inner.lock().await.phase = Phase::Executing;
    }

    /// Completion path: back to Idle with a fresh timestamp.
    pub(crate) async fn finish(&self, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.phase = Phase::Idle;
        inner.last_completed = Some(at);
    }

    /// Abort before execution: back to Idle without a timestamp.
    pub(crate) async fn abort(&self) {
        self.inner.lock().await.phase = Phase::Idle;
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires preparation to execution and owns the single-job invariant.
pub struct PipelineController<H: LiveDataHost> {
    host: Arc<H>,
    config: Arc<BackupConfig>,
    state: Arc<PipelineState>,
}

impl<H: LiveDataHost> Clone for PipelineController<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
        }
    }
}

impl<H: LiveDataHost> PipelineController<H> {
    pub fn new(host: Arc<H>, config: Arc<BackupConfig>) -> Self {
        Self {
            host,
            config,
            state: Arc::new(PipelineState::new()),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Periodic trigger entry point. Applies the participant policy: with
    /// `require_participants` set and nobody online, the run is skipped.
    pub async fn start_scheduled(&self) -> Result<Option<JoinHandle<JobReport>>, PipelineError> {
        if self.config.require_participants && self.host.participant_count() == 0 {
            info!(
                next_attempt_minutes = self.config.interval_minutes,
                "Scheduled backup skipped due to lack of participants"
            );
            return Ok(None);
        }
        self.start(BackupJobSpec::scheduled()).await.map(Some)
    }

    /// Manual trigger entry point: always runs, and is the only path that
    /// can set a custom archive name.
    pub async fn start_manual(
        &self,
        name: Option<String>,
    ) -> Result<JoinHandle<JobReport>, PipelineError> {
        self.start(BackupJobSpec::manual(name)).await
    }

    /// Idle trigger entry point: fires because the last participant left,
    /// so the participant policy does not apply.
    pub async fn start_idle(&self) -> Result<JoinHandle<JobReport>, PipelineError> {
        self.start(BackupJobSpec::idle()).await
    }

    /// Run one job end to end. Returns as soon as the execution stage is
    /// handed off; the join handle resolves with the report once the
    /// completion callback has run.
    async fn start(&self, spec: BackupJobSpec) -> Result<JoinHandle<JobReport>, PipelineError> {
        self.state.try_begin().await?;

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let prepared = match prepare::run(self.host.as_ref(), &self.config, &spec, &work_tx) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Backup aborted during preparation");
                self.state.abort().await;
                return Err(e);
            }
        };
        drop(work_tx);
        self.state.mark_executing().await;

        let reason = spec.reason;
        let paused = prepared.paused;
        let (done_tx, done_rx) = oneshot::channel();
        let exec_config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || execute::run(exec_config, spec, work_rx, done_tx));

        // Completion callback, marshaled back to the synchronous context.
        // This is the only place that touches host state after hand-off.
        let host = Arc::clone(&self.host);
        let state = Arc::clone(&self.state);
        let config = Arc::clone(&self.config);
        let handle = tokio::spawn(async move {
            let outcome = match done_rx.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!("Backup worker vanished without reporting, treating the job as failed");
                    execute::JobOutcome::worker_lost()
                }
            };

            if paused {
                if let Err(e) = host.resume_autosave() {
                    // Surfaced as an operational warning; the job still
                    // counts as finished.
                    error!(error = %e, "Failed to resume autosave after backup");
                }
            }

            if !config.finish_message.trim().is_empty() {
                info!("{}", config.finish_message);
                host.broadcast(&config.finish_message);
            }
            if !outcome.failed.is_empty() {
                warn!(failed = ?outcome.failed, "Backup finished degraded");
                host.broadcast(
                    "An error occurred during the backup; some data may be incomplete. Please notify an operator.",
                );
            }

            let finished_at = Utc::now();
            state.finish(finished_at).await;

            JobReport {
                reason,
                archived: outcome.archived,
                failed: outcome.failed,
                pruned: outcome.pruned,
                duration: outcome.duration,
                finished_at,
            }
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::MockHost;
    use crate::host::Target;
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_world(root: &Path, name: &str) -> Target {
        let path = root.join(name);
        fs::create_dir_all(path.join("region")).unwrap();
        fs::write(path.join("level.dat"), b"level").unwrap();
        fs::write(path.join("region/r.0.0.dat"), b"chunk").unwrap();
        Target {
            name: name.to_string(),
            path,
        }
    }

    fn test_config(temp: &TempDir) -> BackupConfig {
        BackupConfig {
            backup_dir: temp.path().join("backups"),
            compress: false,
            single_archive: false,
            ..Default::default()
        }
    }

    fn root_entries(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_state_machine_rejects_start_outside_idle() {
        let state = PipelineState::new();
        state.try_begin().await.unwrap();
        assert!(matches!(
            state.try_begin().await,
            Err(PipelineError::JobInProgress)
        ));

        state.mark_executing().await;
        assert!(matches!(
            state.try_begin().await,
            Err(PipelineError::JobInProgress)
        ));

        state.finish(Utc::now()).await;
        assert_eq!(state.phase().await, Phase::Idle);
        assert!(state.last_completed().await.is_some());
        state.try_begin().await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduled_skipped_without_participants() {
        let temp = TempDir::new().unwrap();
        let mut host = MockHost::new(vec![write_world(temp.path(), "world")]);
        host.participants = 0;
        let config = BackupConfig {
            require_participants: true,
            ..test_config(&temp)
        };

        let controller = PipelineController::new(Arc::new(host), Arc::new(config));
        let started = controller.start_scheduled().await.unwrap();
        assert!(started.is_none());
        assert_eq!(controller.state().phase().await, Phase::Idle);
        // The host was never touched: no flush, no pause, no broadcast.
        assert!(controller.host.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_manual_named_job_lands_in_custom_namespace() {
        let temp = TempDir::new().unwrap();
        let host = MockHost::new(vec![write_world(temp.path(), "world")]);
        let config = BackupConfig {
            compress: true,
            single_archive: true,
            ..test_config(&temp)
        };
        let backup_root = config.backup_dir.clone();

        let controller = PipelineController::new(Arc::new(host), Arc::new(config));
        let handle = controller
            .start_manual(Some("pre-update".to_string()))
            .await
            .unwrap();
        let report = handle.await.unwrap();

        assert_eq!(report.reason, job::TriggerReason::Manual);
        assert_eq!(report.archived, 1);
        assert!(!report.is_degraded());

        let custom: Vec<_> = fs::read_dir(backup_root.join(execute::CUSTOM_DIR))
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(custom.len(), 1, "exactly one archive, no staging leftover");
        let name = custom[0].file_name().to_string_lossy().into_owned();
        assert!(name.starts_with("pre-update"));
        assert!(name.ends_with(".tar.zst"));
        assert!(custom[0].file_type().unwrap().is_file());
    }

    #[tokio::test]
    async fn test_zero_eligible_targets_still_prunes_and_completes() {
        let temp = TempDir::new().unwrap();
        let host = MockHost::new(vec![write_world(temp.path(), "world")]);
        let config = BackupConfig {
            excluded_targets: vec!["WORLD".to_string()], // case-insensitive match
            max_backups: 3,
            single_archive: true,
            ..test_config(&temp)
        };
        let backup_root = config.backup_dir.clone();

        fs::create_dir_all(&backup_root).unwrap();
        for (i, name) in ["t1", "t2", "t3", "t4", "t5"].iter().enumerate() {
            let file = File::create(backup_root.join(name)).unwrap();
            let age = Duration::from_secs(1000 - i as u64 * 100);
            file.set_modified(SystemTime::now() - age).unwrap();
        }

        let controller = PipelineController::new(Arc::new(host), Arc::new(config));
        let report = controller.start_manual(None).await.unwrap().await.unwrap();

        assert_eq!(report.archived, 0);
        // The empty run still created its destination entry, so pruning had
        // six candidates and kept the three newest.
        assert!(report.pruned >= 2);
        let entries = root_entries(&backup_root);
        assert_eq!(entries.len(), 3);
        assert!(entries.contains(&"t5".to_string()));
        assert!(!entries.contains(&"t1".to_string()));

        assert_eq!(controller.state().phase().await, Phase::Idle);
        assert!(controller.state().last_completed().await.is_some());
    }

    #[tokio::test]
    async fn test_partial_failure_still_attempts_all_targets() {
        let temp = TempDir::new().unwrap();
        let good_a = write_world(temp.path(), "alpha");
        let bad = Target {
            name: "broken".to_string(),
            path: temp.path().join("does-not-exist"),
        };
        let good_b = write_world(temp.path(), "beta");
        let host = MockHost::new(vec![good_a, bad, good_b]);
        let config = test_config(&temp);
        let backup_root = config.backup_dir.clone();

        let controller = PipelineController::new(Arc::new(host), Arc::new(config));
        let report = controller.start_manual(None).await.unwrap().await.unwrap();

        assert_eq!(report.archived, 2);
        assert_eq!(report.failed, vec!["broken".to_string()]);
        assert!(report.is_degraded());

        let entries = root_entries(&backup_root);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with("alpha-"));
        assert!(entries[1].starts_with("beta-"));

        // Degraded warning surfaced to the host, autosave resumed exactly once.
        let events = controller.host.recorded();
        assert_eq!(events.iter().filter(|e| *e == "resume").count(), 1);
        assert!(events.iter().any(|e| e.contains("error occurred")));
        assert_eq!(controller.state().phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn test_pause_failure_aborts_before_any_copy() {
        let temp = TempDir::new().unwrap();
        let mut host = MockHost::new(vec![write_world(temp.path(), "world")]);
        host.fail_pause = true;
        let config = test_config(&temp);
        let backup_root = config.backup_dir.clone();

        let controller = PipelineController::new(Arc::new(host), Arc::new(config));
        let result = controller.start_manual(None).await;
        assert!(matches!(result, Err(PipelineError::PauseFailed(_))));

        assert_eq!(controller.state().phase().await, Phase::Idle);
        assert!(controller.state().last_completed().await.is_none());
        assert!(!backup_root.exists(), "no copying may start after a failed pause");
        let events = controller.host.recorded();
        assert!(!events.iter().any(|e| e == "resume"));
    }

    #[tokio::test]
    async fn test_resume_failure_does_not_block_completion() {
        let temp = TempDir::new().unwrap();
        let mut host = MockHost::new(vec![write_world(temp.path(), "world")]);
        host.fail_resume = true;
        let config = test_config(&temp);

        let controller = PipelineController::new(Arc::new(host), Arc::new(config));
        let report = controller.start_manual(None).await.unwrap().await.unwrap();

        assert_eq!(report.archived, 1);
        assert_eq!(controller.state().phase().await, Phase::Idle);
        assert!(controller.state().last_completed().await.is_some());
    }

    #[tokio::test]
    async fn test_bad_date_format_still_produces_a_backup() {
        let temp = TempDir::new().unwrap();
        let host = MockHost::new(vec![write_world(temp.path(), "world")]);
        // Built in code, so the load-time sanitizing never ran.
        let config = BackupConfig {
            date_format: "nonsense-%".to_string(),
            ..test_config(&temp)
        };
        let backup_root = config.backup_dir.clone();

        let controller = PipelineController::new(Arc::new(host), Arc::new(config));
        let report = controller.start_manual(None).await.unwrap().await.unwrap();

        assert_eq!(report.archived, 1);
        assert!(!report.is_degraded());
        let entries = root_entries(&backup_root);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with("world-"));
        assert!(!entries[0].contains("nonsense"));
    }

    #[tokio::test]
    async fn test_failed_target_flush_is_best_effort() {
        let temp = TempDir::new().unwrap();
        let mut host = MockHost::new(vec![
            write_world(temp.path(), "alpha"),
            write_world(temp.path(), "beta"),
        ]);
        host.fail_flush_for = Some("alpha".to_string());
        let config = test_config(&temp);
        let backup_root = config.backup_dir.clone();

        let controller = PipelineController::new(Arc::new(host), Arc::new(config));
        let report = controller.start_manual(None).await.unwrap().await.unwrap();

        // The unflushed target is still backed up.
        assert_eq!(report.archived, 2);
        assert!(!report.is_degraded());
        assert_eq!(root_entries(&backup_root).len(), 2);
    }
}
