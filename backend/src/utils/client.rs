//! Client address / user-agent extraction and the sanitizing applied before
//! either is shown back to a user.

use axum::http::{header::USER_AGENT, HeaderMap};
use std::net::{IpAddr, SocketAddr};

pub const MAX_USER_AGENT_CHARS: usize = 100;

/// Resolves the address a request should be attributed to.
///
/// Forwarding headers are only consulted when the deployment sits behind a
/// proxy that sets them; otherwise any client could pick its own bucket.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(headers) {
            return Some(ip);
        }
    }
    peer.map(|addr| addr.ip())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        return value
            .split(',')
            .next()
            .and_then(|ip| ip.trim().parse().ok());
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok())
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|agent| agent.trim().to_string())
        .filter(|agent| !agent.is_empty())
}

/// Masks the final octet of an IPv4 address (`203.0.113.xxx`) or the final
/// group of an IPv6 address. Unparseable input is masked entirely.
pub fn mask_address(address: &str) -> String {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.xxx")
        }
        Ok(IpAddr::V6(v6)) => {
            let segments = v6.segments();
            let head = segments[..7]
                .iter()
                .map(|s| format!("{s:x}"))
                .collect::<Vec<_>>()
                .join(":");
            format!("{head}:xxxx")
        }
        Err(_) if address.is_empty() => String::new(),
        Err(_) => "xxx".to_string(),
    }
}

/// Truncates on a character boundary.
pub fn truncate_user_agent(agent: &str) -> String {
    agent.chars().take(MAX_USER_AGENT_CHARS).collect()
}
