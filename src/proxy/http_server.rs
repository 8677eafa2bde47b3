use crate::config::manager::StateHandle;
use crate::state::ProxyState;
use crate::utils::host::{authority, strip_port};
use crate::utils::path::{ACME_PREFIX, resolve_challenge_path};
use anyhow::{Context, Result};
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode, header};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

/// Start the plaintext HTTP server: ACME challenges plus redirects to HTTPS.
pub async fn start_http_server(handle: Arc<StateHandle>) -> Result<()> {
    let addr = handle.load().get_config().plain_addr()?;
    let builder = hyper::Server::try_bind(&addr).with_context(|| format!("Failed to bind HTTP server on {}", addr))?;
    info!("HTTP server running on {}", addr);
    serve_http(builder, handle).await
}

pub async fn serve_http(builder: hyper::server::Builder<AddrIncoming>, handle: Arc<StateHandle>) -> Result<()> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let peer = conn.remote_addr();
        let handle = handle.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let state = handle.load();
                async move {
                    match handle_plain_request(&state, peer, req).await {
                        Ok(resp) => Ok::<_, Infallible>(resp),
                        Err(e) => {
                            error!("HTTP request error from {}: {}", peer.ip(), e);
                            let mut resp = Response::new(Body::empty());
                            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            Ok::<_, Infallible>(resp)
                        }
                    }
                }
            }))
        }
    });

    builder.serve(make_svc).await.context("HTTP server error")
}

pub async fn handle_plain_request(state: &ProxyState, peer: SocketAddr, req: Request<Body>) -> Result<Response<Body>> {
    if req.uri().path().starts_with(ACME_PREFIX) {
        return serve_challenge(state.get_config().get_acme_dir(), peer, &req).await;
    }

    let Some(host) = req.headers().get(header::HOST).and_then(|h| h.to_str().ok()).filter(|h| !h.trim().is_empty()) else {
        warn!("Received plaintext request from {} without a host", peer.ip());
        return Ok(Response::builder().status(StatusCode::BAD_REQUEST).body(Body::from("Bad Request"))?);
    };
    let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let location = redirect_location(host, path_and_query, state.get_config().get_tls_port());
    debug!("Redirecting {} to {}", peer.ip(), location);

    let builder = Response::builder().status(StatusCode::MOVED_PERMANENTLY).header(header::LOCATION, &location);
    if req.method() == Method::GET {
        let body = format!("<a href=\"{}\">Moved Permanently</a>.\n", html_escape(&location));
        return Ok(builder.header(header::CONTENT_TYPE, "text/html; charset=utf-8").body(Body::from(body))?);
    }
    Ok(builder.body(Body::empty())?)
}

/// `https://` URL for the same host and path; the port is dropped when it is 443.
pub fn redirect_location(host: &str, path_and_query: &str, tls_port: u16) -> String {
    let host = strip_port(host.trim());
    if tls_port == 443 {
        let host = if host.contains(':') { format!("[{}]", host) } else { host.to_string() };
        format!("https://{}{}", host, path_and_query)
    } else {
        format!("https://{}{}", authority(host, tls_port), path_and_query)
    }
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

async fn serve_challenge(acme_dir: &str, peer: SocketAddr, req: &Request<Body>) -> Result<Response<Body>> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(Response::builder().status(StatusCode::METHOD_NOT_ALLOWED).header(header::ALLOW, "GET, HEAD").body(Body::empty())?);
    }
    let not_found = || Response::builder().status(StatusCode::NOT_FOUND).body(Body::from("Not Found"));

    let Some(path) = resolve_challenge_path(acme_dir, req.uri().path()) else {
        warn!("Rejected challenge path {} from {}", req.uri().path(), peer.ip());
        return Ok(not_found()?);
    };
    match tokio::fs::read(&path).await {
        Ok(content) => {
            info!("Serving challenge file {} to {}", path.display(), peer.ip());
            let builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain")
                .header(header::CONTENT_LENGTH, content.len());
            let body = if req.method() == Method::HEAD { Body::empty() } else { Body::from(content) };
            Ok(builder.body(body)?)
        }
        Err(e) => {
            debug!("Challenge file {} unavailable: {}", path.display(), e);
            Ok(not_found()?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Config, ForwardingEntry, ProxyMode};

    async fn state(acme_dir: &str, tls_port: u16) -> ProxyState {
        let config = Config::new("./hostmux.json", vec![ForwardingEntry::new("default", "10.0.0.1", 443)])
            .with_mode(ProxyMode::Passthrough)
            .with_ports(80, tls_port)
            .with_acme_dir(acme_dir);
        ProxyState::build(config).await.unwrap()
    }

    fn peer() -> SocketAddr {
        "198.51.100.4:50000".parse().unwrap()
    }

    fn get(host: Option<&str>, path: &str) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_redirect_location() {
        assert_eq!(redirect_location("site.example:80", "/path", 8443), "https://site.example:8443/path");
        assert_eq!(redirect_location("site.example", "/a?b=c", 443), "https://site.example/a?b=c");
        assert_eq!(redirect_location("[::1]:80", "/", 443), "https://[::1]/");
        assert_eq!(redirect_location("[::1]:80", "/", 8443), "https://[::1]:8443/");
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("https://a/?x=1&y=<2>\"'"), "https://a/?x=1&amp;y=&lt;2&gt;&#34;&#39;");
    }

    #[tokio::test]
    async fn test_redirect_scenario() {
        let state = state("./acme", 8443).await;
        let resp = handle_plain_request(&state, peer(), get(Some("site.example:80"), "/some/path?q=1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(resp.headers()[header::LOCATION], "https://site.example:8443/some/path?q=1");

        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"<a href=\"https://site.example:8443/some/path?q=1\">Moved Permanently</a>.\n");
    }

    #[tokio::test]
    async fn test_redirect_without_host() {
        let state = state("./acme", 443).await;
        let resp = handle_plain_request(&state, peer(), get(None, "/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_head_redirect_has_no_body() {
        let state = state("./acme", 443).await;
        let req = Request::builder().method(Method::HEAD).uri("/x").header(header::HOST, "site.example").body(Body::empty()).unwrap();
        let resp = handle_plain_request(&state, peer(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert!(hyper::body::to_bytes(resp.into_body()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_serves_challenge_files() {
        let acme = tempfile::tempdir().unwrap();
        let challenge_dir = acme.path().join(".well-known/acme-challenge");
        std::fs::create_dir_all(&challenge_dir).unwrap();
        std::fs::write(challenge_dir.join("token123"), "token123.thumbprint").unwrap();
        let state = state(&acme.path().to_string_lossy(), 443).await;

        let resp = handle_plain_request(&state, peer(), get(Some("site.example"), "/.well-known/acme-challenge/token123")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&hyper::body::to_bytes(resp.into_body()).await.unwrap()[..], b"token123.thumbprint");

        let missing = handle_plain_request(&state, peer(), get(Some("site.example"), "/.well-known/acme-challenge/nope")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let escape = handle_plain_request(&state, peer(), get(Some("site.example"), "/.well-known/../../etc/passwd")).await.unwrap();
        assert_eq!(escape.status(), StatusCode::NOT_FOUND);
    }
}
