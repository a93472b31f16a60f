//! Turning a packet capture into candidate sub-resource requests.
//!
//! Two tiers: the dissector's JSON frames, then a raw scan of the capture
//! bytes for HTTP request lines.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::OnceLock;

use regex::bytes::Regex;
use serde_json::Value;
use url::Url;

use super::classify::resource_type_from_path;
use crate::db::{DiscoveredResource, Protocol, StateType};

/// Parse `tshark -T json` output into HTTP requests.
///
/// Frames without an HTTP request URI are skipped. Returns an empty list for
/// malformed output.
pub fn parse_dissector_json(output: &str, capture_ip: IpAddr) -> Vec<DiscoveredResource> {
    let frames: Vec<Value> = match serde_json::from_str(output) {
        Ok(frames) => frames,
        Err(e) => {
            tracing::debug!("Could not parse dissector output: {}", e);
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    for frame in &frames {
        let Some(layers) = frame.pointer("/_source/layers").or_else(|| frame.get("layers")) else {
            continue;
        };
        let Some(uri) = layers
            .get("http")
            .and_then(|http| field_str(http, "http.request.full_uri"))
        else {
            continue;
        };
        if !seen.insert(uri.to_string()) {
            continue;
        }

        let ip = layers
            .get("ip")
            .and_then(|ip| field_str(ip, "ip.dst"))
            .or_else(|| layers.get("ipv6").and_then(|ip| field_str(ip, "ipv6.dst")))
            .map(str::to_string)
            .unwrap_or_else(|| capture_ip.to_string());

        let (protocol, state_type) = if layers.get("tcp").is_some() {
            (Protocol::Tcp, StateType::Stateful)
        } else if layers.get("udp").is_some() {
            (Protocol::Udp, StateType::Stateless)
        } else {
            (Protocol::Tcp, StateType::Stateful)
        };

        requests.push(DiscoveredResource {
            url: uri.to_string(),
            ip_address: ip,
            resource_type: resource_type_from_path(uri),
            state_type,
            protocol,
        });
    }

    requests
}

/// Dissector fields are strings, or arrays of strings when repeated.
fn field_str<'a>(layer: &'a Value, key: &str) -> Option<&'a str> {
    match layer.get(key)? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(values) => values.first().and_then(Value::as_str),
        _ => None,
    }
}

/// Scan raw capture bytes for `METHOD target HTTP/x.y` request lines.
///
/// Targets are resolved against `page` so relative paths become absolute.
pub fn parse_request_lines(
    capture: &[u8],
    page: &Url,
    capture_ip: IpAddr,
) -> Vec<DiscoveredResource> {
    static REQUEST_LINE: OnceLock<Regex> = OnceLock::new();
    let re = REQUEST_LINE.get_or_init(|| {
        Regex::new(
            r"(?:GET|POST|PUT|DELETE|HEAD|OPTIONS|PATCH) ([!-~]+) HTTP/[0-9](?:\.[0-9])?",
        )
        .unwrap()
    });

    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    for caps in re.captures_iter(capture) {
        let Some(target) = caps.get(1).and_then(|m| std::str::from_utf8(m.as_bytes()).ok()) else {
            continue;
        };
        let Ok(url) = page.join(target) else {
            continue;
        };
        let url = url.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        requests.push(DiscoveredResource {
            resource_type: resource_type_from_path(&url),
            url,
            ip_address: capture_ip.to_string(),
            state_type: StateType::Stateful,
            protocol: Protocol::Tcp,
        });
    }

    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ResourceType;

    const IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(93, 184, 216, 34));

    #[test]
    fn test_dissector_frames() {
        let output = r#"[
            {"_index": "packets", "_source": {"layers": {
                "frame": {}, "ip": {"ip.dst": "93.184.216.34"}, "tcp": {},
                "http": {"http.request.full_uri": "http://example.com/static/app.js"}
            }}},
            {"_source": {"layers": {
                "frame": {}, "ip": {"ip.dst": "10.0.0.1"}, "tcp": {}
            }}},
            {"layers": {
                "frame": {}, "ipv6": {"ipv6.dst": "2001:db8::1"}, "udp": {},
                "http": {"http.request.full_uri": ["http://239.255.255.250:1900/*"]}
            }},
            {"_source": {"layers": {
                "ip": {"ip.dst": "93.184.216.34"}, "tcp": {},
                "http": {"http.request.full_uri": "http://example.com/static/app.js"}
            }}}
        ]"#;

        let requests = parse_dissector_json(output, IP);
        assert_eq!(requests.len(), 2);

        assert_eq!(requests[0].url, "http://example.com/static/app.js");
        assert_eq!(requests[0].ip_address, "93.184.216.34");
        assert_eq!(requests[0].resource_type, ResourceType::JavaScript);
        assert_eq!(requests[0].protocol, Protocol::Tcp);
        assert_eq!(requests[0].state_type, StateType::Stateful);

        assert_eq!(requests[1].ip_address, "2001:db8::1");
        assert_eq!(requests[1].protocol, Protocol::Udp);
        assert_eq!(requests[1].state_type, StateType::Stateless);
    }

    #[test]
    fn test_malformed_dissector_output() {
        assert!(parse_dissector_json("tshark: permission denied", IP).is_empty());
        assert!(parse_dissector_json("[]", IP).is_empty());
    }

    #[test]
    fn test_request_lines() {
        let page = Url::parse("http://example.com/blog/").unwrap();
        let mut capture = vec![0xd4, 0xc3, 0xb2, 0xa1, 0x02, 0x00];
        capture.extend_from_slice(b"GET /blog/ HTTP/1.1\r\nHost: example.com\r\n\r\n");
        capture.extend_from_slice(&[0xff, 0x00, 0x13]);
        capture.extend_from_slice(b"GET theme.css HTTP/1.1\r\n");
        capture.extend_from_slice(b"POST http://api.example.com/track HTTP/1.1\r\n");
        capture.extend_from_slice(b"GET /blog/ HTTP/1.1\r\n");
        capture.extend_from_slice(b"HTTP/1.1 200 OK\r\n");

        let requests = parse_request_lines(&capture, &page, IP);
        let urls: Vec<_> = requests.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://example.com/blog/",
                "http://example.com/blog/theme.css",
                "http://api.example.com/track",
            ]
        );
        assert_eq!(requests[1].resource_type, ResourceType::Stylesheet);
        assert!(requests.iter().all(|r| r.ip_address == "93.184.216.34"));
        assert!(requests.iter().all(|r| r.protocol == Protocol::Tcp));
    }

    #[test]
    fn test_no_request_lines() {
        let page = Url::parse("https://example.com/").unwrap();
        assert!(parse_request_lines(b"\x16\x03\x01 encrypted", &page, IP).is_empty());
    }
}
