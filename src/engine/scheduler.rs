use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something whose tables can be rebuilt from their sources.
#[async_trait::async_trait]
pub trait Reloadable: Send + Sync + 'static {
    async fn reload(&self) -> Result<()>;

    /// Label used in log lines.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No periodic reload configured.
    Idle,
    Running,
    Stopped,
}

/// Cloneable request side of a scheduler, handed to whoever may ask for reloads.
#[derive(Clone)]
pub struct ReloadTrigger {
    target: Arc<dyn Reloadable>,
    cancel: CancellationToken,
    tx: Option<mpsc::Sender<()>>,
}

impl ReloadTrigger {
    pub fn state(&self) -> SchedulerState {
        if self.cancel.is_cancelled() {
            SchedulerState::Stopped
        } else if self.tx.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Requests an immediate reload.
    ///
    /// With a running task the request is queued on it (and coalesced with any
    /// request already pending); without one the reload runs inline until it
    /// finishes or the scheduler is shut down. Returns false once stopped.
    pub async fn reload_now(&self) -> bool {
        match self.state() {
            SchedulerState::Stopped => false,
            SchedulerState::Running => {
                if let Some(tx) = &self.tx {
                    let _ = tx.try_send(());
                }
                true
            }
            SchedulerState::Idle => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        debug!("Manual reload of {} abandoned on shutdown", self.target.name());
                        false
                    }
                    result = self.target.reload() => {
                        if let Err(e) = result {
                            warn!(
                                "Reload of {} failed, keeping current tables: {:#}",
                                self.target.name(),
                                e
                            );
                        }
                        true
                    }
                }
            }
        }
    }
}

/// Owns the background reload task of one engine.
///
/// Dropping the handle cancels the task.
pub struct ReloadHandle {
    trigger: ReloadTrigger,
    task: Option<JoinHandle<()>>,
}

impl ReloadHandle {
    /// Starts periodic reloads every `period`. A zero period spawns nothing.
    pub fn spawn(target: Arc<dyn Reloadable>, period: Duration) -> Self {
        let cancel = CancellationToken::new();

        if period.is_zero() {
            debug!("Periodic reload disabled for {}", target.name());
            return Self {
                trigger: ReloadTrigger {
                    target,
                    cancel,
                    tx: None,
                },
                task: None,
            };
        }

        let (tx, rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(run(target.clone(), period, cancel.clone(), rx));
        info!(
            "Reloading {} every {}",
            target.name(),
            humantime::format_duration(period)
        );

        Self {
            trigger: ReloadTrigger {
                target,
                cancel,
                tx: Some(tx),
            },
            task: Some(task),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.trigger.state()
    }

    pub fn trigger(&self) -> ReloadTrigger {
        self.trigger.clone()
    }

    pub async fn reload_now(&self) -> bool {
        self.trigger.reload_now().await
    }

    /// Cancels the background task, and any inline reload started through a
    /// trigger, then waits for the task to exit.
    pub async fn shutdown(mut self) {
        self.trigger.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
            debug!("Reload task for {} stopped", self.trigger.target.name());
        }
    }
}

impl Drop for ReloadHandle {
    fn drop(&mut self) {
        self.trigger.cancel.cancel();
    }
}

async fn run(
    target: Arc<dyn Reloadable>,
    period: Duration,
    cancel: CancellationToken,
    mut trigger: mpsc::Receiver<()>,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the startup load already happened.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                debug!("Scheduled reload of {}", target.name());
            }
            Some(()) = trigger.recv() => {
                info!("Forced reload of {}", target.name());
                interval.reset();
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = target.reload() => {
                if let Err(e) = result {
                    warn!("Reload of {} failed, keeping current tables: {:#}", target.name(), e);
                }
            }
        }
    }
}
