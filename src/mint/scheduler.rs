//! Periodic refresh task with pause, resume and shutdown.
//!
//! The first tick fires immediately. Ticks are skipped while the gate is
//! paused, and resuming triggers a refresh right away.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Something the scheduler refreshes.
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// Shared pause switch of a scheduler.
///
/// Every `pause` starts a new generation; a delayed resume scheduled in an
/// earlier generation does nothing when it fires.
#[derive(Clone)]
pub struct RefreshGate {
    paused: Arc<watch::Sender<bool>>,
    generation: Arc<AtomicU64>,
}

impl RefreshGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            paused: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn pause(&self) {
        debug!("Auto refresh paused");
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        debug!("Auto refresh resumed");
        self.paused.send_replace(false);
    }

    /// Resume after `delay` without blocking the caller, unless the gate is
    /// paused again in the meantime.
    pub fn resume_after(&self, delay: Duration) -> JoinHandle<()> {
        let gate = self.clone();
        let generation = self.generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if gate.generation.load(Ordering::SeqCst) == generation {
                gate.resume();
            } else {
                debug!("Delayed resume superseded by a newer pause");
            }
        })
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Whether a running scheduler is listening to this gate.
    pub fn has_scheduler(&self) -> bool {
        self.paused.receiver_count() > 0
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running scheduler; dropping it also stops the task.
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Refresh task ended abnormally: {}", e);
        }
    }
}

pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Spawn the refresh loop for `target`.
    pub fn spawn<T>(target: Arc<T>, period: Duration, gate: RefreshGate) -> SchedulerHandle
    where
        T: RefreshTarget + ?Sized + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut paused_rx = gate.subscribe();

        let task = tokio::spawn(async move {
            info!("Refresh scheduler started, interval {:?}", period);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let paused = *paused_rx.borrow();
                        if paused {
                            debug!("Refresh tick skipped while paused");
                        } else {
                            run_refresh(target.as_ref()).await;
                        }
                    }
                    changed = paused_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let paused = *paused_rx.borrow_and_update();
                        if !paused {
                            run_refresh(target.as_ref()).await;
                            ticker.reset();
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            info!("Refresh scheduler stopped");
        });

        SchedulerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

async fn run_refresh<T: RefreshTarget + ?Sized>(target: &T) {
    if let Err(e) = target.refresh().await {
        warn!("Refresh failed: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl RefreshTarget for Counter {
        async fn refresh(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_and_pause() {
        let counter = Arc::new(Counter::default());
        let gate = RefreshGate::new();
        let handle = RefreshScheduler::spawn(counter.clone(), Duration::from_secs(20), gate.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 2);

        gate.pause();
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 2);

        gate.resume();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_delay() {
        let counter = Arc::new(Counter::default());
        let gate = RefreshGate::new();
        let handle = RefreshScheduler::spawn(counter.clone(), Duration::from_secs(20), gate.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate.pause();
        gate.resume_after(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 2);
        assert!(!gate.is_paused());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_supersedes_pending_resume() {
        let counter = Arc::new(Counter::default());
        let gate = RefreshGate::new();
        let handle = RefreshScheduler::spawn(counter.clone(), Duration::from_secs(20), gate.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate.pause();
        gate.resume_after(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        gate.pause();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(gate.is_paused());
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);

        gate.resume_after(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!gate.is_paused());
        assert_eq!(counter.runs.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_scheduler_presence() {
        let gate = RefreshGate::new();
        assert!(!gate.has_scheduler());

        let handle = RefreshScheduler::spawn(
            Arc::new(Counter::default()),
            Duration::from_secs(20),
            gate.clone(),
        );
        assert!(gate.has_scheduler());

        handle.shutdown().await;
        assert!(!gate.has_scheduler());
    }
}
