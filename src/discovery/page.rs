//! Fallback discovery: fetch the page and read its resource references.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::classify::guess_resource_type;
use super::resolve::ip_for_url;
use super::{Strategy, IP_INVALID_URL, IP_REQUEST_FAILED, IP_UNKNOWN};
use crate::db::{DiscoveredResource, Protocol, ResourceType, StateType};
use crate::probe::normalize_url;

/// Fetches the page over HTTP and parses scripts, stylesheets and images.
///
/// Always yields at least one record: request failures and unusable URLs
/// become sentinel placeholders.
pub struct PageStrategy {
    client: reqwest::Client,
}

impl PageStrategy {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Strategy for PageStrategy {
    fn name(&self) -> &'static str {
        "page"
    }

    async fn discover(&self, url: &str) -> Option<Vec<DiscoveredResource>> {
        let normalized = normalize_url(url);
        let page = match Url::parse(&normalized) {
            Ok(page) if page.host_str().is_some() => page,
            _ => {
                tracing::warn!("Invalid URL format even after normalizing: {}", normalized);
                return Some(vec![DiscoveredResource::placeholder(normalized, IP_INVALID_URL)]);
            }
        };

        let response = match self.client.get(page.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Request failed in page discovery for {}: {}", normalized, e);
                return Some(vec![DiscoveredResource::placeholder(normalized, IP_REQUEST_FAILED)]);
            }
        };

        let base = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if !content_type.contains("text/html") {
            return Some(vec![DiscoveredResource {
                resource_type: guess_resource_type(&normalized, &content_type),
                url: normalized,
                ip_address: IP_UNKNOWN.to_string(),
                state_type: StateType::Unknown,
                protocol: Protocol::Tcp,
            }]);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Could not read page body for {}: {}", normalized, e);
                return Some(vec![DiscoveredResource::placeholder(normalized, IP_REQUEST_FAILED)]);
            }
        };

        let references = extract_resources(&body, &base);
        if references.is_empty() {
            return Some(vec![DiscoveredResource {
                ip_address: ip_for_url(&page).await,
                url: normalized,
                resource_type: ResourceType::Html,
                state_type: StateType::Stateful,
                protocol: Protocol::Tcp,
            }]);
        }

        // One lookup per host; pages tend to pull many assets from few hosts.
        let mut addresses: HashMap<String, String> = HashMap::new();
        let mut resources = Vec::with_capacity(references.len());
        for (resource_url, resource_type) in references {
            let host = resource_url.host_str().unwrap_or_default().to_string();
            let ip_address = match addresses.get(&host) {
                Some(ip) => ip.clone(),
                None => {
                    let ip = ip_for_url(&resource_url).await;
                    addresses.insert(host, ip.clone());
                    ip
                }
            };

            resources.push(DiscoveredResource {
                url: resource_url.to_string(),
                ip_address,
                resource_type,
                state_type: StateType::Stateless,
                protocol: Protocol::Tcp,
            });
        }

        Some(resources)
    }
}

/// Resource references in document order per kind: scripts, stylesheets,
/// then images. A `<base href>` overrides `page` as the resolution base.
pub fn extract_resources(html: &str, page: &Url) -> Vec<(Url, ResourceType)> {
    let document = Html::parse_document(html);

    let base_sel = Selector::parse("base[href]").unwrap();
    let base = document
        .select(&base_sel)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| page.join(href.trim()).ok())
        .unwrap_or_else(|| page.clone());

    let script_sel = Selector::parse("script[src]").unwrap();
    let link_sel = Selector::parse("link[href]").unwrap();
    let img_sel = Selector::parse("img[src]").unwrap();

    let scripts = document
        .select(&script_sel)
        .filter_map(|e| e.value().attr("src"))
        .map(|src| (src, ResourceType::JavaScript));

    let stylesheets = document
        .select(&link_sel)
        .filter(|e| {
            e.value().attr("rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|t| t.eq_ignore_ascii_case("stylesheet"))
            })
        })
        .filter_map(|e| e.value().attr("href"))
        .map(|href| (href, ResourceType::Stylesheet));

    let images = document
        .select(&img_sel)
        .filter_map(|e| e.value().attr("src"))
        .map(|src| (src, ResourceType::Image));

    let mut seen = HashSet::new();
    scripts
        .chain(stylesheets)
        .chain(images)
        .filter_map(|(reference, resource_type)| {
            let reference = reference.trim();
            if reference.is_empty() {
                return None;
            }
            let url = base.join(reference).ok()?;
            if !matches!(url.scheme(), "http" | "https") {
                return None;
            }
            seen.insert(url.to_string()).then_some((url, resource_type))
        })
        .collect()
}
