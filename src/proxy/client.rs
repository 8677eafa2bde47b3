use crate::config::types::Config;
use anyhow::{Context, Result};
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_tls::HttpsConnector;
use std::time::Duration;

const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

pub type UpstreamHttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Connections to upstreams, shared by every request and WebSocket handshake.
///
/// Built once at startup; the pool inside `http` is reused across requests and
/// across config reloads.
#[derive(Clone)]
pub struct UpstreamClients {
    http: UpstreamHttpClient,
}

impl UpstreamClients {
    pub fn new(config: &Config) -> Result<Self> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(config.is_skip_verify())
            .danger_accept_invalid_hostnames(config.is_skip_verify())
            .build()
            .context("Failed to build upstream TLS connector")?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(config.get_connect_timeout_secs())));
        http.set_keepalive(Some(TCP_KEEPALIVE));
        http.set_nodelay(true);

        let https = HttpsConnector::from((http, tokio_native_tls::TlsConnector::from(tls)));
        let http = Client::builder().build::<_, Body>(https);
        Ok(Self { http })
    }

    pub fn http(&self) -> &UpstreamHttpClient {
        &self.http
    }

    pub fn connect_timeout(config: &Config) -> Duration {
        Duration::from_secs(config.get_connect_timeout_secs())
    }
}
