//! Trigger sources deciding when a backup job starts.
//!
//! Three sources feed the same pipeline: the periodic scheduler, manual
//! invocation (handled directly by the controller), and the presence-based
//! idle trigger that fires once when the last participant has been gone for
//! a configured grace period.

use crate::host::LiveDataHost;
use crate::pipeline::{PipelineController, PipelineError};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run the periodic trigger loop until a shutdown signal arrives.
///
/// The first run happens one full interval after startup, matching the
/// original schedule. An interval of zero disables periodic backups
/// entirely.
pub async fn run_scheduler<H: LiveDataHost>(
    controller: PipelineController<H>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if interval.is_zero() {
        info!("Periodic backups are disabled (interval is 0)");
        return;
    }

    let mut ticker = schedule_ticker(interval);
    // interval() fires immediately; swallow that tick so the first backup
    // waits a full interval.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match controller.start_scheduled().await {
                    Ok(Some(_)) => {}
                    Ok(None) => {} // skipped by the participant policy
                    Err(PipelineError::JobInProgress) => {
                        warn!("Scheduled backup skipped: previous job still running");
                    }
                    Err(e) => error!(error = %e, "Scheduled backup failed to start"),
                }
            }
            _ = shutdown.recv() => {
                info!("Scheduler stopping");
                break;
            }
        }
    }
}

/// A backup that overruns its slot gets at most one attempt per elapsed
/// interval, never a burst of catch-up ticks.
fn schedule_ticker(interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Presence-based trigger: one final backup after the last participant has
/// left, cancelled if anyone returns first.
pub struct IdleTrigger<H: LiveDataHost> {
    controller: PipelineController<H>,
    delay: Duration,
    pending: Mutex<Option<CancellationToken>>,
}

impl<H: LiveDataHost> IdleTrigger<H> {
    pub fn new(controller: PipelineController<H>, delay: Duration) -> Self {
        Self {
            controller,
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Call when a participant disconnects. Once `remaining` hits zero a
    /// delayed one-shot backup is armed.
    pub async fn participant_left(&self, remaining: usize) {
        if remaining > 0 {
            return;
        }

        let token = CancellationToken::new();
        {
            let mut pending = self.pending.lock().await;
            if let Some(previous) = pending.take() {
                previous.cancel();
            }
            *pending = Some(token.clone());
        }

        info!(
            delay_secs = self.delay.as_secs(),
            "Last participant left; a final backup is scheduled unless someone returns"
        );

        let controller = self.controller.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    info!("Starting final backup before going idle");
                    match controller.start_idle().await {
                        Ok(_) => {}
                        Err(PipelineError::JobInProgress) => {
                            warn!("Final backup skipped: a job is already running");
                        }
                        Err(e) => error!(error = %e, "Final backup failed to start"),
                    }
                }
                _ = token.cancelled() => {
                    debug!("Pending idle backup cancelled");
                }
            }
        });
    }

    /// Call when a participant connects; disarms any pending idle backup.
    pub async fn participant_joined(&self) {
        let mut pending = self.pending.lock().await;
        if let Some(token) = pending.take() {
            token.cancel();
            info!("Participant returned, resuming the normal backup cycle");
        }
    }
}
