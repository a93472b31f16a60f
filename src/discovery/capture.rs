//! Live discovery by capturing the traffic of a page load.

use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;
use url::Url;

use super::dissect::{parse_dissector_json, parse_request_lines};
use super::resolve::resolve_host;
use super::{DiscoveryConfig, Strategy};
use crate::db::DiscoveredResource;
use crate::probe::normalize_url;

/// Time the capture tool gets to attach before the page is requested.
const CAPTURE_WARMUP: Duration = Duration::from_millis(300);

/// pcap global header; a file this short holds no packets.
const PCAP_HEADER_LEN: usize = 24;

/// Only one capture runs at a time across the process.
fn capture_slot() -> &'static Semaphore {
    static SLOT: OnceLock<Semaphore> = OnceLock::new();
    SLOT.get_or_init(|| Semaphore::new(1))
}

/// Captures traffic to the target host while loading the page once, then
/// reads HTTP requests out of the capture.
///
/// Yields `None` whenever capture is not possible (tool missing, no
/// privileges, another capture running) or saw nothing readable, e.g. TLS.
pub struct CaptureStrategy {
    client: reqwest::Client,
    config: DiscoveryConfig,
}

impl CaptureStrategy {
    pub fn new(client: reqwest::Client, config: DiscoveryConfig) -> Self {
        Self { client, config }
    }

    async fn capture(&self, page: &Url, ip: IpAddr, path: &Path) -> Option<()> {
        let mut child = match Command::new(&self.config.capture_tool)
            .args(["-n", "-i", "any", "-U", "-c"])
            .arg(self.config.capture_packets.to_string())
            .arg("-w")
            .arg(path)
            .arg("host")
            .arg(ip.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("{} not installed, skipping capture", self.config.capture_tool);
                return None;
            }
            Err(e) => {
                tracing::warn!("Could not start {}: {}", self.config.capture_tool, e);
                return None;
            }
        };

        tokio::time::sleep(CAPTURE_WARMUP).await;

        let load_and_wait = async {
            match self.client.get(page.clone()).send().await {
                Ok(response) => {
                    let _ = response.bytes().await;
                }
                Err(e) => tracing::debug!("Page load during capture failed for {}: {}", page, e),
            }
            child.wait().await
        };

        let waited = tokio::time::timeout(self.config.capture_window, load_and_wait).await;
        match waited {
            Ok(Ok(status)) if !status.success() => {
                tracing::debug!("{} exited with {}", self.config.capture_tool, status);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Waiting on {} failed: {}", self.config.capture_tool, e),
            Err(_) => {
                // Packet limit not reached inside the window.
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }

        Some(())
    }

    async fn dissect(&self, path: &Path, ip: IpAddr) -> Vec<DiscoveredResource> {
        let run = Command::new(&self.config.dissect_tool)
            .arg("-r")
            .arg(path)
            .args(["-T", "json", "-Y", "http.request"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.config.capture_window, run).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_dissector_json(&String::from_utf8_lossy(&output.stdout), ip)
            }
            Ok(Ok(output)) => {
                tracing::debug!("{} exited with {}", self.config.dissect_tool, output.status);
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::debug!("Could not run {}: {}", self.config.dissect_tool, e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("{} timed out", self.config.dissect_tool);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Strategy for CaptureStrategy {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn discover(&self, url: &str) -> Option<Vec<DiscoveredResource>> {
        let page = Url::parse(&normalize_url(url)).ok()?;
        let host = page.host_str()?;
        let ip = match resolve_host(host).await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::debug!("Skipping capture for {}: {}", url, e);
                return None;
            }
        };

        let Ok(_slot) = capture_slot().try_acquire() else {
            tracing::debug!("Capture already running, skipping for {}", url);
            return None;
        };

        let file = match tempfile::Builder::new().prefix("capture_").suffix(".pcap").tempfile() {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Could not create capture file: {}", e);
                return None;
            }
        };

        self.capture(&page, ip, file.path()).await?;

        let bytes = tokio::fs::read(file.path()).await.unwrap_or_default();
        if bytes.len() <= PCAP_HEADER_LEN {
            tracing::debug!("Capture for {} recorded no packets", url);
            return None;
        }

        let mut found = self.dissect(file.path(), ip).await;
        if found.is_empty() {
            found = parse_request_lines(&bytes, &page, ip);
        }

        if found.is_empty() {
            None
        } else {
            Some(found)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_site;
    use axum::{routing::get, Router};

    fn strategy(capture_tool: &str) -> CaptureStrategy {
        let config = DiscoveryConfig {
            capture_window: Duration::from_millis(500),
            capture_tool: capture_tool.to_string(),
            dissect_tool: "urlmon-missing-dissector".to_string(),
            ..Default::default()
        };
        let client = crate::probe::build_client(Duration::from_secs(2)).unwrap();
        CaptureStrategy::new(client, config)
    }

    #[tokio::test]
    async fn test_missing_capture_tool_hands_over() {
        let base = spawn_site(Router::new().route("/", get(|| async { "ok" }))).await;
        let found = strategy("urlmon-missing-capture-tool").discover(&base).await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_host_hands_over() {
        let found = strategy("tcpdump").discover("http://no-such-host.invalid/").await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_tool_writing_nothing_hands_over() {
        // `true` accepts any arguments and leaves the capture file empty.
        let base = spawn_site(Router::new().route("/", get(|| async { "ok" }))).await;
        let found = strategy("true").discover(&base).await;
        assert!(found.is_none());
    }
}
