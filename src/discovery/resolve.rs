//! Hostname resolution for discovered resources.

use std::net::IpAddr;

use crate::probe::ProbeError;

/// Resolve hostname to IP address.
pub async fn resolve_host(host: &str) -> Result<IpAddr, ProbeError> {
    // IPv6 literals arrive bracketed from `Url::host_str`.
    let host = host.trim_start_matches('[').trim_end_matches(']');

    // Try direct parse first
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    // DNS resolution
    let addrs: Vec<_> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .collect();

    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", host)))
}

/// Resolve the host of `url`, or the "Unknown" sentinel.
pub async fn ip_for_url(url: &url::Url) -> String {
    let Some(host) = url.host_str() else {
        return super::IP_UNKNOWN.to_string();
    };
    match resolve_host(host).await {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            tracing::debug!("Could not resolve {}: {}", host, e);
            super::IP_UNKNOWN.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_literal_addresses() {
        assert_eq!(resolve_host("127.0.0.1").await.unwrap().to_string(), "127.0.0.1");
        assert_eq!(resolve_host("[::1]").await.unwrap().to_string(), "::1");
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        assert!(resolve_host("no-such-host.invalid").await.is_err());

        let url = url::Url::parse("http://no-such-host.invalid/app.js").unwrap();
        assert_eq!(ip_for_url(&url).await, "Unknown");
    }
}
