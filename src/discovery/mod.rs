//! Sub-resource discovery.
//!
//! Strategies run in order until one yields records: a live packet capture,
//! then a fetch-and-parse of the page, then a placeholder. The whole chain
//! runs as its own task under one deadline, so a hung tool or a panicking
//! parser costs at most one placeholder row.

mod capture;
mod classify;
mod dissect;
mod page;
mod resolve;

pub use capture::*;
pub use classify::*;
pub use dissect::*;
pub use page::*;
pub use resolve::*;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{DiscoveredResource, Store};
use crate::probe::{build_client, ProbeError};

/// Sentinel IP values recorded in place of a real address.
pub const IP_UNKNOWN: &str = "Unknown";
pub const IP_INVALID_URL: &str = "Invalid URL";
pub const IP_REQUEST_FAILED: &str = "Request Failed";
pub const IP_ERROR: &str = "Error";
pub const IP_UNDETERMINED: &str = "Could not determine";

/// Knobs for the built-in strategies.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Timeout for the fallback page fetch and the capture's own page load.
    pub request_timeout: Duration,
    pub capture_window: Duration,
    pub capture_packets: u32,
    pub capture_tool: String,
    pub dissect_tool: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            capture_window: Duration::from_secs(3),
            capture_packets: 50,
            capture_tool: "tcpdump".to_string(),
            dissect_tool: "tshark".to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Upper bound on one run of the default chain: capture window, its
    /// dissection, then a full fallback fetch.
    pub fn deadline(&self) -> Duration {
        self.capture_window * 2 + self.request_timeout + Duration::from_secs(1)
    }
}

/// One way of finding the requests a page makes.
///
/// `None` or an empty list hands over to the next strategy.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn discover(&self, url: &str) -> Option<Vec<DiscoveredResource>>;
}

/// Tail of the chain: records that nothing could be learned.
pub struct LastResortStrategy;

#[async_trait]
impl Strategy for LastResortStrategy {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    async fn discover(&self, url: &str) -> Option<Vec<DiscoveredResource>> {
        Some(vec![DiscoveredResource::placeholder(url, IP_ERROR)])
    }
}

/// Result of one discovery pass for a target.
#[derive(Debug)]
pub struct Discovery {
    /// Name of the strategy that produced `resources`.
    pub strategy: &'static str,
    pub resources: Vec<DiscoveredResource>,
    /// How many of `resources` were new for the target.
    pub inserted: usize,
}

/// Runs the strategy chain and persists what it finds.
pub struct ResourceDiscoverer {
    store: Arc<Store>,
    chain: Arc<[Box<dyn Strategy>]>,
    deadline: Duration,
}

impl ResourceDiscoverer {
    /// The default chain: capture, page parse, placeholder.
    pub fn new(store: Arc<Store>, config: DiscoveryConfig) -> Result<Self, ProbeError> {
        let client = build_client(config.request_timeout)?;
        let deadline = config.deadline();
        let chain: Vec<Box<dyn Strategy>> = vec![
            Box::new(CaptureStrategy::new(client.clone(), config)),
            Box::new(PageStrategy::new(client)),
            Box::new(LastResortStrategy),
        ];
        Ok(Self::with_strategies(store, chain, deadline))
    }

    pub fn with_strategies(
        store: Arc<Store>,
        chain: Vec<Box<dyn Strategy>>,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            chain: chain.into(),
            deadline,
        }
    }

    /// Run the chain for `url` without touching the store.
    ///
    /// Never returns an empty list. A chain that overruns the deadline or
    /// panics yields a single "Could not determine" placeholder.
    pub async fn observe(&self, url: &str) -> (&'static str, Vec<DiscoveredResource>) {
        let chain = self.chain.clone();
        let owned = url.to_string();
        let handle = tokio::spawn(async move { run_chain(&chain, &owned).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.deadline, handle).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                tracing::error!("Discovery task for {} failed: {}", url, e);
                ("none", vec![DiscoveredResource::placeholder(url, IP_UNDETERMINED)])
            }
            Err(_) => {
                abort.abort();
                tracing::warn!("Discovery for {} exceeded {:?}", url, self.deadline);
                ("none", vec![DiscoveredResource::placeholder(url, IP_UNDETERMINED)])
            }
        }
    }

    /// Discover resources for a target and store the ones not yet known.
    pub async fn discover(&self, target_id: i64, url: &str) -> Discovery {
        let (strategy, resources) = self.observe(url).await;

        let mut inserted = 0;
        for resource in &resources {
            match self.store.add_subsequent_request_if_absent(target_id, resource) {
                Ok(Some(_)) => inserted += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Failed to store discovered request {}: {}", resource.url, e);
                    break;
                }
            }
        }

        tracing::info!(
            "Discovery ({}) found {} requests for {}, {} new",
            strategy,
            resources.len(),
            url,
            inserted
        );

        Discovery {
            strategy,
            resources,
            inserted,
        }
    }
}

async fn run_chain(
    chain: &[Box<dyn Strategy>],
    url: &str,
) -> (&'static str, Vec<DiscoveredResource>) {
    for strategy in chain {
        match strategy.discover(url).await {
            Some(found) if !found.is_empty() => return (strategy.name(), dedup(found)),
            _ => tracing::debug!("{} discovery found nothing for {}", strategy.name(), url),
        }
    }
    ("placeholder", vec![DiscoveredResource::placeholder(url, IP_ERROR)])
}

fn dedup(resources: Vec<DiscoveredResource>) -> Vec<DiscoveredResource> {
    let mut seen = HashSet::new();
    resources
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MonitoredTarget, Protocol, ResourceType, StateType, SubsequentRequestFilter};
    use crate::test_support::open_store;

    struct Fixed(&'static str, Option<Vec<DiscoveredResource>>);

    #[async_trait]
    impl Strategy for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn discover(&self, _url: &str) -> Option<Vec<DiscoveredResource>> {
            self.1.clone()
        }
    }

    struct Stalls;

    #[async_trait]
    impl Strategy for Stalls {
        fn name(&self) -> &'static str {
            "stalls"
        }

        async fn discover(&self, _url: &str) -> Option<Vec<DiscoveredResource>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            None
        }
    }

    struct Panics;

    #[async_trait]
    impl Strategy for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        async fn discover(&self, _url: &str) -> Option<Vec<DiscoveredResource>> {
            panic!("parser blew up");
        }
    }

    fn resource(url: &str) -> DiscoveredResource {
        DiscoveredResource {
            url: url.to_string(),
            ip_address: "10.0.0.7".to_string(),
            resource_type: ResourceType::JavaScript,
            state_type: StateType::Stateless,
            protocol: Protocol::Tcp,
        }
    }

    fn target(store: &Store) -> MonitoredTarget {
        let mut target = MonitoredTarget {
            url: "https://example.com".to_string(),
            name: "Example".to_string(),
            ..Default::default()
        };
        store.add_target(&mut target).unwrap();
        target
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_first_result() {
        let (_tmp, store) = open_store();
        let script = resource("https://example.com/a.js");
        let twice = vec![script.clone(), script];
        let discoverer = ResourceDiscoverer::with_strategies(
            store,
            vec![
                Box::new(Fixed("none", None)),
                Box::new(Fixed("empty", Some(vec![]))),
                Box::new(Fixed("hit", Some(twice))),
                Box::new(LastResortStrategy),
            ],
            Duration::from_secs(5),
        );

        let (strategy, found) = discoverer.observe("https://example.com").await;
        assert_eq!(strategy, "hit");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_last_resort_placeholder() {
        let (_tmp, store) = open_store();
        let discoverer = ResourceDiscoverer::with_strategies(
            store,
            vec![Box::new(Fixed("none", None)), Box::new(LastResortStrategy)],
            Duration::from_secs(5),
        );

        let (strategy, found) = discoverer.observe("https://example.com").await;
        assert_eq!(strategy, "placeholder");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ip_address, "Error");
        assert_eq!(found[0].resource_type, ResourceType::Unknown);
    }

    #[tokio::test]
    async fn test_deadline_and_panic_yield_placeholder() {
        let (_tmp, store) = open_store();

        let stalled = ResourceDiscoverer::with_strategies(
            store.clone(),
            vec![Box::new(Stalls)],
            Duration::from_millis(100),
        );
        let (_, found) = stalled.observe("https://slow.example").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://slow.example");
        assert_eq!(found[0].ip_address, "Could not determine");

        let broken = ResourceDiscoverer::with_strategies(
            store,
            vec![Box::new(Panics)],
            Duration::from_secs(5),
        );
        let (_, found) = broken.observe("https://broken.example").await;
        assert_eq!(found[0].ip_address, "Could not determine");
    }

    #[tokio::test]
    async fn test_discover_persists_only_new_requests() {
        let (_tmp, store) = open_store();
        let target = target(&store);
        let found = vec![
            resource("https://example.com/a.js"),
            resource("https://example.com/b.css"),
        ];
        let discoverer = ResourceDiscoverer::with_strategies(
            store.clone(),
            vec![Box::new(Fixed("hit", Some(found)))],
            Duration::from_secs(5),
        );

        let first = discoverer.discover(target.id, &target.url).await;
        assert_eq!(first.resources.len(), 2);
        assert_eq!(first.inserted, 2);

        let second = discoverer.discover(target.id, &target.url).await;
        assert_eq!(second.inserted, 0);

        let stored = store
            .subsequent_requests(target.id, &SubsequentRequestFilter::default())
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_default_deadline() {
        assert_eq!(DiscoveryConfig::default().deadline(), Duration::from_secs(17));
    }
}
