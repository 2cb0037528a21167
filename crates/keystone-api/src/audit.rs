//! Request context extraction
//!
//! Builds the [`RequestContext`] every auth flow receives from the request
//! headers and the peer address.
//!
//! Author: hephaex@gmail.com

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap};
use keystone_core::auth::resolve_client_id;
use keystone_core::RequestContext;
use std::net::SocketAddr;

/// Client identifier per `X-Forwarded-For` → `X-Real-IP` → socket → `"unknown"`
pub fn extract_client_id(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    resolve_client_id(
        headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()),
        headers.get("x-real-ip").and_then(|h| h.to_str().ok()),
        peer.map(|ConnectInfo(addr)| addr.ip()),
    )
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

pub fn request_context(
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> RequestContext {
    RequestContext {
        ip_address: Some(extract_client_id(headers, peer)),
        user_agent: extract_user_agent(headers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.4, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));

        let peer = ConnectInfo("127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        let ctx = request_context(&headers, Some(&peer));

        assert_eq!(ctx.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_socket_then_unknown() {
        let headers = HeaderMap::new();
        let peer = ConnectInfo("192.0.2.9:443".parse::<SocketAddr>().unwrap());

        assert_eq!(extract_client_id(&headers, Some(&peer)), "192.0.2.9");
        assert_eq!(extract_client_id(&headers, None), "unknown");
    }
}
