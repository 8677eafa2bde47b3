//! Reverse proxy engine for decrypted HTTP/1.1 requests.

use crate::forwarding::RouteMatch;
use crate::proxy::client::UpstreamClients;
use crate::proxy::headers::{is_websocket, sanitize_request_headers, sanitize_response_headers};
use crate::proxy::websocket::proxy_websocket;
use crate::state::ProxyState;
use crate::utils::host::{authority, is_loopback_host, normalize_host, strip_port};
use anyhow::Result;
use hyper::http::Version;
use hyper::{Body, Request, Response, StatusCode, Uri, header};
use log::{debug, info, warn};
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("plaintext upstream {0} is not a loopback address")]
    PlaintextNotLoopback(String),
    #[error("invalid upstream target {0}")]
    InvalidTarget(String),
}

/// Where a request goes once its route is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub tls: bool,
    pub host: String,
    pub port: u16,
    /// Replacement `Host` header; `None` keeps the client's.
    pub host_header: Option<String>,
}

impl Upstream {
    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }

    pub fn http_scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    pub fn ws_scheme(&self) -> &'static str {
        if self.tls { "wss" } else { "ws" }
    }

    pub fn url(&self, scheme: &str, path_and_query: &str) -> String {
        format!("{}://{}{}", scheme, self.authority(), path_and_query)
    }
}

/// Extract the target host from the Host header (or the request URI), without its port.
pub fn extract_host(req: &Request<Body>) -> Option<String> {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|hv| hv.to_str().ok())
        .map(|h| strip_port(h.trim()).to_string())
        .or_else(|| req.uri().host().map(|h| strip_port(h).to_string()))?;
    if host.is_empty() { None } else { Some(host) }
}

/// Pick the upstream for a routed request.
///
/// The entry's `host` replaces the request host only when `override_url_host`
/// is set; cleartext upstreams must be on the loopback interface.
pub fn resolve_upstream(route: &RouteMatch<'_>, request_host: &str) -> Result<Upstream, UpstreamError> {
    let entry = route.entry;
    let host = if entry.is_override_url_host() && !entry.get_host().is_empty() { entry.get_host().to_string() } else { normalize_host(request_host) };
    if !entry.is_tls() && !is_loopback_host(&host) {
        return Err(UpstreamError::PlaintextNotLoopback(host));
    }
    let host_header = entry.is_override_host_header().then(|| host.clone());
    Ok(Upstream { tls: entry.is_tls(), host, port: entry.get_port(), host_header })
}

pub(crate) fn text_response(status: StatusCode, text: &'static str) -> Result<Response<Body>> {
    Ok(Response::builder().status(status).header(header::CONTENT_TYPE, "text/plain").body(Body::from(text))?)
}

/// Route a decrypted request to its upstream and relay the response.
pub async fn handle_request(state: &ProxyState, clients: &UpstreamClients, peer: SocketAddr, req: Request<Body>) -> Result<Response<Body>> {
    let Some(domain) = extract_host(&req) else {
        warn!("Received request from {} without a host", peer.ip());
        return text_response(StatusCode::BAD_REQUEST, "Bad Request");
    };

    let route = state.get_routes().lookup(&domain);
    let upstream = match resolve_upstream(&route, &domain) {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("Refusing request from {} for {}: {}", peer.ip(), domain, e);
            return text_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };
    let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string();

    if is_websocket(&req) {
        info!("WebSocket request from {} for {} -> {}", peer.ip(), domain, upstream.url(upstream.ws_scheme(), &path_and_query));
        return proxy_websocket(peer, req, &upstream, clients, UpstreamClients::connect_timeout(state.get_config())).await;
    }

    let target = upstream.url(upstream.http_scheme(), &path_and_query);
    info!(
        "Received request from {ip} for https://{host} -> {target}{fallback}",
        ip = peer.ip(),
        host = domain,
        target = target,
        fallback = if route.is_default { " (default)" } else { "" }
    );

    let Ok(uri) = target.parse::<Uri>() else {
        warn!("{}", UpstreamError::InvalidTarget(target));
        return text_response(StatusCode::BAD_REQUEST, "Bad Request");
    };

    let (mut parts, body) = req.into_parts();
    sanitize_request_headers(&mut parts.headers, peer.ip(), false);
    if let Some(host) = &upstream.host_header {
        parts.headers.insert(header::HOST, host.parse()?);
    } else if !parts.headers.contains_key(header::HOST) {
        parts.headers.insert(header::HOST, domain.parse()?);
    }
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    match clients.http().request(Request::from_parts(parts, body)).await {
        Ok(mut response) => {
            sanitize_response_headers(response.headers_mut());
            if response.headers().contains_key(header::TRAILER) {
                debug!("Upstream {} announced trailers; they are not forwarded", target);
            }
            Ok(response)
        }
        Err(e) => {
            warn!("HTTP proxy error for {} -> {}: {}", domain, target, e);
            text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ForwardingEntry;
    use crate::forwarding::ForwardingTable;

    fn scenario_table() -> ForwardingTable {
        ForwardingTable::build(&[
            ForwardingEntry::new("a.example.com", "", 8081),
            ForwardingEntry::new("local.example.com", "127.0.0.1", 9000).with_tls(false).with_override_host_header(true),
            ForwardingEntry::new("pinned.example.com", "10.0.0.9", 8443).with_override_url_host(false),
            ForwardingEntry::new("default", "127.0.0.1", 8080),
        ])
        .unwrap()
    }

    fn request_with_host(host: &str) -> Request<Body> {
        Request::builder().uri("/index.html?x=1").header(header::HOST, host).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host(&request_with_host("A.Example.Com:8443")).as_deref(), Some("A.Example.Com"));
        assert_eq!(extract_host(&request_with_host("[::1]:443")).as_deref(), Some("::1"));

        let absolute = Request::builder().uri("https://uri.example.com:8443/x").body(Body::empty()).unwrap();
        assert_eq!(extract_host(&absolute).as_deref(), Some("uri.example.com"));

        let bare = Request::builder().uri("/x").body(Body::empty()).unwrap();
        assert_eq!(extract_host(&bare), None);
    }

    #[test]
    fn test_routing_scenario() {
        let table = scenario_table();

        let host = extract_host(&request_with_host("A.Example.Com")).unwrap();
        let upstream = resolve_upstream(&table.lookup(&host), &host).unwrap();
        assert_eq!(upstream.authority(), "a.example.com:8081");
        assert_eq!(upstream.http_scheme(), "https");
        assert_eq!(upstream.host_header, None);

        let upstream = resolve_upstream(&table.lookup("unknown.test"), "unknown.test").unwrap();
        assert_eq!(upstream.authority(), "127.0.0.1:8080");
    }

    #[test]
    fn test_host_header_override() {
        let table = scenario_table();
        let upstream = resolve_upstream(&table.lookup("local.example.com"), "local.example.com").unwrap();
        assert_eq!(upstream.url(upstream.http_scheme(), "/a?b"), "http://127.0.0.1:9000/a?b");
        assert_eq!(upstream.ws_scheme(), "ws");
        assert_eq!(upstream.host_header.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_url_host_override_disabled() {
        let table = scenario_table();
        let upstream = resolve_upstream(&table.lookup("pinned.example.com"), "pinned.example.com").unwrap();
        assert_eq!(upstream.authority(), "pinned.example.com:8443");
    }

    #[test]
    fn test_plaintext_upstream_must_be_loopback() {
        let table = ForwardingTable::build(&[ForwardingEntry::new("default", "", 8080).with_tls(false)]).unwrap();
        assert_eq!(
            resolve_upstream(&table.lookup("public.example.com"), "public.example.com"),
            Err(UpstreamError::PlaintextNotLoopback("public.example.com".to_string()))
        );
        assert!(resolve_upstream(&table.lookup("localhost"), "localhost").is_ok());
    }
}
