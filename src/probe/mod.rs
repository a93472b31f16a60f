//! Probe module for URL monitoring.
//!
//! A probe is one bounded HTTP(S) GET whose result is always data: transport
//! failures become a down [`ProbeOutcome`] rather than an error.

mod http;

pub use http::*;

use std::time::{Duration, Instant};
use thiserror::Error;

use crate::db::ProbeOutcome;

/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack added on top of the client timeout before the hard deadline fires.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Runs probes with a shared HTTP client.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        Ok(Self {
            client: build_client(timeout)?,
            timeout,
        })
    }

    /// Probe `url` once. Never fails and never outlives the timeout by more
    /// than a small constant.
    pub async fn probe(&self, target_id: i64, url: &str) -> ProbeOutcome {
        let start = Instant::now();
        let deadline = self.timeout + DEADLINE_GRACE;

        let request = run_http_probe(&self.client, url, self.timeout);
        let result = match tokio::time::timeout(deadline, request).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        };

        match result {
            Ok(status) => {
                ProbeOutcome::from_status(target_id, status, start.elapsed().as_secs_f64())
            }
            Err(e) => {
                tracing::debug!("Probe failed for {}: {}", url, e);
                ProbeOutcome::failed(target_id, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_site;
    use axum::{http::StatusCode, routing::get, Router};

    #[tokio::test]
    async fn test_probe_classifies_status() {
        let app = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let base = spawn_site(app).await;
        let prober = Prober::new(Duration::from_secs(5)).unwrap();

        let ok = prober.probe(1, &format!("{base}/ok")).await;
        assert_eq!(ok.status_code, 200);
        assert!(ok.up);
        assert!(ok.latency >= 0.0);
        assert!(ok.error.is_none());

        let missing = prober.probe(1, &format!("{base}/missing")).await;
        assert_eq!(missing.status_code, 404);
        assert!(!missing.up);

        let broken = prober.probe(1, &format!("{base}/broken")).await;
        assert_eq!(broken.status_code, 500);
        assert!(!broken.up);
    }

    #[tokio::test]
    async fn test_probe_timeout_is_recorded_as_down() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let base = spawn_site(app).await;
        let prober = Prober::new(Duration::from_millis(200)).unwrap();

        let start = Instant::now();
        let outcome = prober.probe(7, &format!("{base}/slow")).await;
        assert!(start.elapsed() < Duration::from_secs(2));

        assert_eq!(outcome.target_id, 7);
        assert_eq!(outcome.status_code, 0);
        assert_eq!(outcome.latency, 0.0);
        assert!(!outcome.up);
        assert!(!outcome.error.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let addr = crate::test_support::unused_addr().await;
        let prober = Prober::new(Duration::from_secs(2)).unwrap();

        let outcome = prober.probe(1, &format!("http://{addr}/")).await;
        assert_eq!(outcome.status_code, 0);
        assert!(!outcome.up);
        assert!(outcome.error.is_some());
    }
}
