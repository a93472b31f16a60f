//! Alerting: failure-streak tracking and notification delivery.

mod notifier;
mod tracker;

pub use notifier::*;
pub use tracker::*;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::{DbError, MonitoredTarget, ProbeOutcome, Store};

/// Applies probe outcomes to persisted alert state and emits notifications.
///
/// The load → transition → save sequence for one target runs under that
/// target's lock; different targets proceed in parallel.
pub struct AlertManager {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    policy: AlertPolicy,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl AlertManager {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>, policy: AlertPolicy) -> Self {
        Self {
            store,
            notifier,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, target_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(target_id).or_default().clone()
    }

    /// Drop the per-target lock of a deleted target.
    pub fn forget(&self, target_id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(&target_id);
    }

    /// Feed one outcome into the target's alert state.
    ///
    /// The state is committed before delivery is attempted; a failed delivery
    /// is logged and does not roll it back. Returns the event that was due.
    pub async fn process(
        &self,
        target: &MonitoredTarget,
        outcome: &ProbeOutcome,
    ) -> Result<Option<AlertEvent>, DbError> {
        if !target.tracks_alerts() {
            return Ok(None);
        }

        let applied = {
            let lock = self.lock_for(target.id);
            let _guard = lock.lock().await;

            let current = self.store.load_alert_state(target.id)?;
            let now = Utc::now();
            let next = transition(&current, outcome.up, target.alert_recovery, &self.policy, now);
            self.store.save_alert_state(target.id, &next.state)?;
            next
        };

        match applied.event {
            Some(AlertEvent::Failure { consecutive_failures }) => {
                tracing::warn!(
                    "{} is down for {} consecutive checks, sending failure alert",
                    target.name,
                    consecutive_failures
                );
                self.notifier
                    .notify_failure(target, outcome, consecutive_failures)
                    .await;
            }
            Some(AlertEvent::Recovery) => {
                tracing::info!("{} recovered, sending recovery alert", target.name);
                self.notifier.notify_recovery(target).await;
            }
            None => {}
        }

        Ok(applied.event)
    }
}
