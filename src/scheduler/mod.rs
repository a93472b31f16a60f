//! Scheduler module: one cancelable recurring job per monitored target.

use crate::db::{DbError, MonitoredTarget, ProbeOutcome, Store};
use crate::monitor::{Monitor, MonitorError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

/// The main scheduler that owns the per-target check loops.
pub struct Scheduler {
    store: Arc<Store>,
    monitor: Arc<Monitor>,
    stop_chans: RwLock<HashMap<i64, broadcast::Sender<()>>>,
}

impl Scheduler {
    /// Create a new scheduler with the given store.
    pub fn new(store: Arc<Store>, monitor: Arc<Monitor>) -> Self {
        Self {
            store,
            monitor,
            stop_chans: RwLock::new(HashMap::new()),
        }
    }

    /// Start a job for every active recurring target. Returns the job count.
    ///
    /// First checks fire in the background, spread over a short window.
    pub async fn start(&self) -> Result<usize, DbError> {
        let targets = self.store.list_active_targets()?;

        tracing::info!("Starting scheduler with {} targets", targets.len());

        let count = targets.len();
        for target in targets {
            let window = target.check_interval().as_millis().min(5000) as u64;
            let spread = Duration::from_millis(rand::random::<u64>() % window);
            self.spawn_job(target, Instant::now() + spread).await;
        }

        Ok(count)
    }

    /// Schedule a target, replacing any job it already has, then run one
    /// check right away and return its outcome.
    pub async fn schedule(&self, target: MonitoredTarget) -> Result<ProbeOutcome, MonitorError> {
        let first_tick = Instant::now() + target.check_interval();
        self.spawn_job(target.clone(), first_tick).await;
        self.monitor.check(&target).await
    }

    /// Cancel a target's job. Returns false when there was none.
    pub async fn unschedule(&self, id: i64) -> bool {
        let mut stop_chans = self.stop_chans.write().await;

        match stop_chans.remove(&id) {
            Some(stop_tx) => {
                let _ = stop_tx.send(());
                tracing::info!("Scheduler: Removed target {}", id);
                true
            }
            None => false,
        }
    }

    /// Replace the job of a target that has one; no-op otherwise.
    pub async fn reschedule(
        &self,
        target: MonitoredTarget,
    ) -> Option<Result<ProbeOutcome, MonitorError>> {
        if !self.is_scheduled(target.id).await {
            return None;
        }
        Some(self.schedule(target).await)
    }

    pub async fn is_scheduled(&self, id: i64) -> bool {
        self.stop_chans.read().await.contains_key(&id)
    }

    pub async fn active_jobs(&self) -> usize {
        self.stop_chans.read().await.len()
    }

    async fn spawn_job(&self, target: MonitoredTarget, first_tick: Instant) {
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let mut stop_chans = self.stop_chans.write().await;
        if let Some(previous) = stop_chans.insert(target.id, stop_tx) {
            let _ = previous.send(());
        }
        drop(stop_chans);

        tracing::info!(
            "Scheduler: Adding target {} every {}s",
            target.name,
            target.check_interval().as_secs()
        );

        tokio::spawn(run_check_loop(self.monitor.clone(), target, first_tick, stop_rx));
    }
}

/// Run the check loop for a single target until stopped.
///
/// A tick in progress when the stop arrives finishes; no further tick runs.
async fn run_check_loop(
    monitor: Arc<Monitor>,
    target: MonitoredTarget,
    first_tick: Instant,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval_at(first_tick, target.check_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                // Add jitter to avoid thundering herd
                let jitter = rand::random::<u64>() % 100;
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                if let Err(e) = monitor.check(&target).await {
                    tracing::error!("Check failed for {}: {}", target.name, e);
                }
            }
        }
    }

    tracing::debug!("Check loop for {} stopped", target.name);
}
