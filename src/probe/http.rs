//! HTTP probe implementation.

use std::time::Duration;
use super::ProbeError;

/// Prefix `http://` when the address carries no scheme.
pub fn normalize_url(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// Build the HTTP client shared by probes and page fetches.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("urlmon/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProbeError::Config(e.to_string()))
}

/// Run an HTTP GET against the given address.
///
/// Returns the final status code once the whole body has arrived.
pub async fn run_http_probe(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<u16, ProbeError> {
    let url = normalize_url(address);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| classify_error(e, timeout))?;

    let status = response.status().as_u16();

    // Read the full body to measure complete transfer time
    let _body = response
        .bytes()
        .await
        .map_err(|e| classify_error(e, timeout))?;

    Ok(status)
}

pub(crate) fn classify_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}
