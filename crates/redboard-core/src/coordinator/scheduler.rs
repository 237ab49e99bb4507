//! Timer loop driving periodic refresh cycles

use super::Coordinator;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Handle to a running scheduler loop
///
/// Dropping the handle also stops the loop.
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for it; an in-flight cycle still completes
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(super) fn spawn(coordinator: Arc<Coordinator>) -> SchedulerHandle {
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(run(coordinator, rx));
    SchedulerHandle {
        shutdown: Some(tx),
        task,
    }
}

async fn run(coordinator: Arc<Coordinator>, mut shutdown: oneshot::Receiver<()>) {
    info!(
        config_id = %coordinator.config_id(),
        interval = %coordinator.polling_interval(),
        "Scheduler started"
    );

    loop {
        let deadline = next_deadline(&coordinator);
        debug!(
            config_id = %coordinator.config_id(),
            in_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
            "Next refresh scheduled"
        );

        tokio::select! {
            _ = &mut shutdown => break,
            // Interval change or explicit refresh: recompute the deadline
            _ = coordinator.reschedule.notified() => continue,
            _ = tokio::time::sleep_until(deadline) => {
                if let Err(e) = coordinator.run_cycle().await {
                    warn!(config_id = %coordinator.config_id(), error = %e, "Scheduled refresh failed");
                }
            }
        }
    }

    info!(config_id = %coordinator.config_id(), "Scheduler stopped");
}

/// When the next tick is due
///
/// After a cycle ran in this process, one interval after it started.
/// Before that, based on the last successful fetch: immediately when none
/// is known or it is older than the interval, otherwise when it expires.
fn next_deadline(coordinator: &Coordinator) -> Instant {
    let interval = coordinator.polling_interval().as_duration();
    let now = Instant::now();

    if let Some(started) = *coordinator.last_cycle_started.lock() {
        return started + interval;
    }

    let Some(last_success) = coordinator.status().last_successful_fetch else {
        return now;
    };
    let age = (Utc::now() - last_success).to_std().unwrap_or_default();
    match interval.checked_sub(age) {
        Some(remaining) => now + remaining,
        None => now,
    }
}
