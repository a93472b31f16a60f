//! Database model types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A URL under monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: i64,
    pub url: String,
    pub name: String,
    #[serde(rename = "is_active")]
    pub active: bool,
    /// Check interval in seconds, at least 1.
    pub check_frequency: i64,
    #[serde(rename = "is_one_time")]
    pub one_time: bool,
    pub alert_enabled: bool,
    pub alert_recovery: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for MonitoredTarget {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            url: String::new(),
            name: String::new(),
            active: true,
            check_frequency: 60,
            one_time: false,
            alert_enabled: false,
            alert_recovery: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl MonitoredTarget {
    /// Whether this target belongs in the scheduler.
    pub fn is_recurring(&self) -> bool {
        self.active && !self.one_time
    }

    /// Time between two scheduled checks.
    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_frequency.max(1) as u64)
    }

    /// Whether probe outcomes for this target feed the state tracker.
    pub fn tracks_alerts(&self) -> bool {
        self.alert_enabled && !self.one_time
    }
}

/// The result of a single probe. Never mutated once stored.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub id: i64,
    #[serde(skip)]
    pub target_id: i64,
    pub timestamp: DateTime<Utc>,
    /// HTTP status, 0 for connection-level failures.
    pub status_code: u16,
    /// Latency in seconds.
    #[serde(rename = "response_time")]
    pub latency: f64,
    #[serde(rename = "is_up")]
    pub up: bool,
    #[serde(rename = "error_message")]
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// An outcome for a response that arrived.
    pub fn from_status(target_id: i64, status_code: u16, latency: f64) -> Self {
        Self {
            id: 0,
            target_id,
            timestamp: Utc::now(),
            status_code,
            latency: latency.max(0.0),
            up: (200..400).contains(&status_code),
            error: None,
        }
    }

    /// An outcome for a transport failure.
    pub fn failed(target_id: i64, error: impl Into<String>) -> Self {
        Self {
            id: 0,
            target_id,
            timestamp: Utc::now(),
            status_code: 0,
            latency: 0.0,
            up: false,
            error: Some(error.into()),
        }
    }
}

/// Per-target failure streak bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertState {
    pub consecutive_failures: u32,
    pub last_alerted_at: Option<DateTime<Utc>>,
    pub alerting: bool,
}

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            /// Parse a stored label, mapping anything unrecognised to `Unknown`.
            pub fn from_label(label: &str) -> Self {
                match label {
                    $($label => Self::$variant,)+
                    _ => Self::Unknown,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

labelled_enum! {
    /// Kind of sub-resource a page pulled in.
    ResourceType {
        JavaScript => "JavaScript",
        Stylesheet => "Stylesheet",
        Image => "Image",
        Html => "HTML",
        Other => "Other",
        Unknown => "Unknown",
    }
}

labelled_enum! {
    StateType {
        Stateful => "Stateful",
        Stateless => "Stateless",
        Unknown => "Unknown",
    }
}

labelled_enum! {
    Protocol {
        Tcp => "TCP",
        Udp => "UDP",
        Unknown => "Unknown",
    }
}

/// A sub-resource observed during discovery, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredResource {
    pub url: String,
    pub ip_address: String,
    pub resource_type: ResourceType,
    pub state_type: StateType,
    pub protocol: Protocol,
}

impl DiscoveredResource {
    /// A record that only carries a sentinel in place of an address.
    pub fn placeholder(url: impl Into<String>, sentinel: &str) -> Self {
        Self {
            url: url.into(),
            ip_address: sentinel.to_string(),
            resource_type: ResourceType::Unknown,
            state_type: StateType::Unknown,
            protocol: Protocol::Unknown,
        }
    }
}

/// A stored sub-resource record, unique per (target, url).
#[derive(Debug, Clone, Serialize)]
pub struct SubsequentRequest {
    pub id: i64,
    #[serde(skip)]
    pub target_id: i64,
    pub target_url: String,
    pub ip_address: String,
    pub resource_type: ResourceType,
    pub state_type: StateType,
    pub protocol: Protocol,
    pub timestamp: DateTime<Utc>,
}

/// Optional equality filters for sub-resource history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubsequentRequestFilter {
    pub resource_type: Option<String>,
    pub state_type: Option<String>,
    pub protocol: Option<String>,
}

/// Distinct filter values present in the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterOptions {
    pub resource_types: Vec<String>,
    pub state_types: Vec<String>,
    pub protocols: Vec<String>,
}

/// Which targets a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    #[default]
    Monitored,
    OneTime,
    All,
}

/// Row counts removed alongside a target.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeletedCounts {
    pub deleted_status_records: usize,
    pub deleted_subsequent_requests: usize,
}
