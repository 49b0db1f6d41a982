//! Periodic and one-shot check triggers.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Why a scheduled check fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTrigger {
    /// The repeating check interval elapsed
    Periodic,
    /// The retry after a failed automatic check elapsed
    Retry,
}

/// Wake mechanism for background manifest checks.
///
/// At most one repeating and one one-shot trigger exist at a time;
/// installing a trigger replaces the previous one of the same kind.
pub trait CheckScheduler: Send + Sync {
    fn install_repeating(&self, interval: Duration);

    fn cancel_repeating(&self);

    fn install_one_shot(&self);

    fn cancel_one_shot(&self);
}

/// Scheduler backed by tokio timers.
///
/// Fired triggers are delivered on the channel passed to [`TokioScheduler::new`].
pub struct TokioScheduler {
    triggers: mpsc::UnboundedSender<CheckTrigger>,
    retry_delay: Duration,
    repeating: Mutex<Option<JoinHandle<()>>>,
    one_shot: Mutex<Option<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new(triggers: mpsc::UnboundedSender<CheckTrigger>, retry_delay: Duration) -> Self {
        Self {
            triggers,
            retry_delay,
            repeating: Mutex::new(None),
            one_shot: Mutex::new(None),
        }
    }

    pub fn has_repeating(&self) -> bool {
        self.repeating.lock().is_some()
    }

    pub fn has_one_shot(&self) -> bool {
        self.one_shot
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl CheckScheduler for TokioScheduler {
    fn install_repeating(&self, interval: Duration) {
        let triggers = self.triggers.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if triggers.send(CheckTrigger::Periodic).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.repeating.lock().replace(task) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "Installed periodic update check");
    }

    fn cancel_repeating(&self) {
        if let Some(task) = self.repeating.lock().take() {
            task.abort();
            info!("Cancelled periodic update check");
        }
    }

    fn install_one_shot(&self) {
        let triggers = self.triggers.clone();
        let delay = self.retry_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = triggers.send(CheckTrigger::Retry);
        });

        if let Some(previous) = self.one_shot.lock().replace(task) {
            previous.abort();
        }
        debug!(delay_secs = delay.as_secs(), "Installed update check retry");
    }

    fn cancel_one_shot(&self) {
        if let Some(task) = self.one_shot.lock().take() {
            task.abort();
            debug!("Cancelled update check retry");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for slot in [&self.repeating, &self.one_shot] {
            if let Some(task) = slot.lock().take() {
                task.abort();
            }
        }
    }
}
