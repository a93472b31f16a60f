//! Shared fixtures for unit tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tempfile::NamedTempFile;

use crate::alert::{AlertManager, AlertPolicy, Notifier};
use crate::db::{MonitoredTarget, ProbeOutcome, Store};
use crate::discovery::{LastResortStrategy, PageStrategy, ResourceDiscoverer, Strategy};
use crate::monitor::Monitor;
use crate::probe::{build_client, Prober};

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_site(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A local address with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn open_store() -> (NamedTempFile, Arc<Store>) {
    let tmp = NamedTempFile::new().unwrap();
    let store = Arc::new(Store::new(tmp.path()).unwrap());
    (tmp, store)
}

/// A monitor whose discovery skips packet capture.
pub fn build_monitor(
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    policy: AlertPolicy,
) -> Monitor {
    let timeout = Duration::from_secs(2);
    let chain: Vec<Box<dyn Strategy>> = vec![
        Box::new(PageStrategy::new(build_client(timeout).unwrap())),
        Box::new(LastResortStrategy),
    ];
    let discoverer =
        ResourceDiscoverer::with_strategies(store.clone(), chain, Duration::from_secs(5));
    let alerts = AlertManager::new(store.clone(), notifier, policy);
    Monitor::new(store, Prober::new(timeout).unwrap(), Arc::new(discoverer), Arc::new(alerts))
}

/// Records every notification it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    failures: Mutex<Vec<(i64, u32)>>,
    recoveries: Mutex<Vec<i64>>,
}

impl RecordingNotifier {
    /// A notifier whose deliveries all fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn failures(&self) -> Vec<(i64, u32)> {
        self.failures.lock().unwrap().clone()
    }

    pub fn recoveries(&self) -> Vec<i64> {
        self.recoveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_failure(
        &self,
        target: &MonitoredTarget,
        _outcome: &ProbeOutcome,
        consecutive_failures: u32,
    ) -> bool {
        self.failures.lock().unwrap().push((target.id, consecutive_failures));
        !self.fail
    }

    async fn notify_recovery(&self, target: &MonitoredTarget) -> bool {
        self.recoveries.lock().unwrap().push(target.id);
        !self.fail
    }
}
