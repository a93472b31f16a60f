//! One check of one target: probe, record, track alerts, discover.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use crate::alert::AlertManager;
use crate::db::{
    DbError, MonitoredTarget, ProbeOutcome, Store, SubsequentRequest, SubsequentRequestFilter,
};
use crate::discovery::ResourceDiscoverer;
use crate::probe::Prober;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Result of a synchronous one-off check.
#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub status: ProbeOutcome,
    pub subsequent_requests: Vec<SubsequentRequest>,
}

type InflightSet = Arc<Mutex<HashSet<i64>>>;

/// Marks a discovery as running for a target until dropped.
struct InflightGuard {
    set: InflightSet,
    target_id: i64,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.target_id);
    }
}

pub struct Monitor {
    store: Arc<Store>,
    prober: Prober,
    discoverer: Arc<ResourceDiscoverer>,
    alerts: Arc<AlertManager>,
    inflight: InflightSet,
}

impl Monitor {
    pub fn new(
        store: Arc<Store>,
        prober: Prober,
        discoverer: Arc<ResourceDiscoverer>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            store,
            prober,
            discoverer,
            alerts,
            inflight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// A scheduled check. Discovery is handed to a background task, at most
    /// one per target; a tick that finds one running skips discovery.
    pub async fn check(&self, target: &MonitoredTarget) -> Result<ProbeOutcome, MonitorError> {
        let outcome = self.record_probe(target).await?;

        match self.claim_discovery(target.id) {
            Some(guard) => {
                let discoverer = self.discoverer.clone();
                let target_id = target.id;
                let url = target.url.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    discoverer.discover(target_id, &url).await;
                });
            }
            None => tracing::debug!("Discovery still running for {}, skipping", target.name),
        }

        Ok(outcome)
    }

    /// A one-off check: waits for discovery and returns everything recorded
    /// for the target.
    pub async fn check_once(&self, target: &MonitoredTarget) -> Result<CheckReport, MonitorError> {
        let status = self.record_probe(target).await?;
        self.discoverer.discover(target.id, &target.url).await;
        let subsequent_requests = self
            .store
            .subsequent_requests(target.id, &SubsequentRequestFilter::default())?;

        Ok(CheckReport {
            status,
            subsequent_requests,
        })
    }

    /// Release per-target state of a deleted target.
    pub fn forget(&self, target_id: i64) {
        self.alerts.forget(target_id);
    }

    async fn record_probe(&self, target: &MonitoredTarget) -> Result<ProbeOutcome, MonitorError> {
        let mut outcome = self.prober.probe(target.id, &target.url).await;
        outcome.id = self.store.save_probe_outcome(&outcome)?;

        if outcome.up {
            tracing::debug!(
                "{} is up: {} in {:.3}s",
                target.name,
                outcome.status_code,
                outcome.latency
            );
        } else {
            tracing::info!(
                "{} is down: status {} ({})",
                target.name,
                outcome.status_code,
                outcome.error.as_deref().unwrap_or("bad status")
            );
        }

        self.alerts.process(target, &outcome).await?;
        Ok(outcome)
    }

    fn claim_discovery(&self, target_id: i64) -> Option<InflightGuard> {
        let mut set = self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.insert(target_id).then(|| InflightGuard {
            set: self.inflight.clone(),
            target_id,
        })
    }
}
