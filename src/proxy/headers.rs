use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Body, Request};
use std::net::IpAddr;

/// Headers that only describe the client ↔ proxy leg.
const HOP_BY_HOP: [&str; 8] = [
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "accept-encoding",
    "proxy-connection",
];

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Check if the request is a WebSocket upgrade request
pub fn is_websocket(req: &Request<Body>) -> bool {
    let has_upgrade_ws =
        req.headers().get(header::UPGRADE).and_then(|v| v.to_str().ok()).map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
    has_upgrade_ws && connection_tokens(req.headers()).iter().any(|t| t == "upgrade")
}

/// Lowercased, trimmed tokens of every `Connection` header value.
pub fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Prepare inbound request headers for the upstream leg.
///
/// Forwarding headers are regenerated from `peer`; anything the client sent
/// under those names is discarded.
pub fn sanitize_request_headers(headers: &mut HeaderMap, peer: IpAddr, websocket: bool) {
    for token in connection_tokens(headers) {
        headers.remove(token.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    if !websocket {
        headers.remove(header::CONNECTION);
        headers.remove(header::UPGRADE);
    }

    let peer = HeaderValue::from_str(&peer.to_string()).unwrap_or_else(|_| HeaderValue::from_static("unknown"));
    headers.remove(X_FORWARDED_FOR);
    headers.remove(X_REAL_IP);
    headers.insert(X_FORWARDED_FOR, peer.clone());
    headers.insert(X_REAL_IP, peer);
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
}

pub fn sanitize_response_headers(headers: &mut HeaderMap) {
    headers.remove(header::CONNECTION);
}
