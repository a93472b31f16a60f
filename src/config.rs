//! Configuration module for urlmon.
//!
//! Loads configuration from environment variables (and an optional `.env`
//! file) with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::alert::AlertPolicy;
use crate::discovery::DiscoveryConfig;
use crate::probe::DEFAULT_PROBE_TIMEOUT;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the REST API (default: 5000)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "url_monitor.db")
    pub db_path: String,
    /// Webhook endpoint for alerts; `None` disables delivery
    pub slack_webhook_url: Option<String>,
    /// Consecutive failures before a failure alert (default: 2)
    pub alert_failure_threshold: u32,
    /// Minimum minutes between two failure alerts (default: 15)
    pub alert_cooldown_minutes: i64,
    /// Timeout for probes and fallback page fetches (default: 10)
    pub probe_timeout_secs: u64,
    /// Packet capture window (default: 3)
    pub capture_secs: u64,
    /// Packet capture limit (default: 50)
    pub capture_packets: u32,
    pub capture_tool: String,
    pub dissect_tool: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 5000,
            db_path: "url_monitor.db".to_string(),
            slack_webhook_url: None,
            alert_failure_threshold: 2,
            alert_cooldown_minutes: 15,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            capture_secs: 3,
            capture_packets: 50,
            capture_tool: "tcpdump".to_string(),
            dissect_tool: "tshark".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `URLMON_HTTP_PORT`: HTTP port (default: 5000)
    /// - `URLMON_DB_PATH`: Database file path (default: "url_monitor.db")
    /// - `SLACK_WEBHOOK_URL`: alert webhook (default: unset)
    /// - `ALERT_FAILURE_THRESHOLD`: failure streak threshold (default: 2)
    /// - `ALERT_COOLDOWN_MINUTES`: failure alert cooldown (default: 15)
    /// - `URLMON_PROBE_TIMEOUT_SECS`: probe timeout (default: 10)
    /// - `URLMON_CAPTURE_SECS`: capture window (default: 3)
    /// - `URLMON_CAPTURE_PACKETS`: capture packet limit (default: 50)
    /// - `URLMON_CAPTURE_TOOL`: capture binary (default: "tcpdump")
    /// - `URLMON_DISSECT_TOOL`: pcap dissector binary (default: "tshark")
    pub fn load() -> Self {
        // A missing .env file is the normal case.
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();

        override_parsed("URLMON_HTTP_PORT", &mut cfg.http_port);
        override_parsed("URLMON_DB_PATH", &mut cfg.db_path);
        override_parsed("ALERT_FAILURE_THRESHOLD", &mut cfg.alert_failure_threshold);
        override_parsed("ALERT_COOLDOWN_MINUTES", &mut cfg.alert_cooldown_minutes);
        override_parsed("URLMON_PROBE_TIMEOUT_SECS", &mut cfg.probe_timeout_secs);
        override_parsed("URLMON_CAPTURE_SECS", &mut cfg.capture_secs);
        override_parsed("URLMON_CAPTURE_PACKETS", &mut cfg.capture_packets);
        override_parsed("URLMON_CAPTURE_TOOL", &mut cfg.capture_tool);
        override_parsed("URLMON_DISSECT_TOOL", &mut cfg.dissect_tool);

        if let Ok(webhook) = env::var("SLACK_WEBHOOK_URL") {
            let webhook = webhook.trim();
            if !webhook.is_empty() {
                cfg.slack_webhook_url = Some(webhook.to_string());
            }
        }

        cfg
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    /// Alerting knobs used by the state tracker.
    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy::new(
            self.alert_failure_threshold,
            chrono::Duration::minutes(self.alert_cooldown_minutes.max(0)),
        )
    }

    /// Knobs for the capture and fallback discovery strategies.
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            request_timeout: self.probe_timeout(),
            capture_window: Duration::from_secs(self.capture_secs.max(1)),
            capture_packets: self.capture_packets.max(1),
            capture_tool: self.capture_tool.clone(),
            dissect_tool: self.dissect_tool.clone(),
        }
    }
}

fn override_parsed<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = env::var(key) {
        if let Some(value) = parse_value(&raw) {
            *slot = value;
        }
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}
