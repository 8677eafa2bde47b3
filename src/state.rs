use crate::config::types::{Config, ProxyMode};
use crate::forwarding::RoutingTable;
use crate::tls::cert_store::CertificateStore;
use anyhow::{Context, Result};
use log::warn;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Everything a connection handler reads, built once per (re)load.
///
/// Handlers hold an `Arc<ProxyState>` for the lifetime of a connection, so a
/// reload never changes the table under a request that is already routing.
pub struct ProxyState {
    config: Config,
    routes: RoutingTable,
    certificates: Option<Arc<CertificateStore>>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl ProxyState {
    /// Build the routing table and, when terminating TLS, load every certificate.
    pub async fn build(config: Config) -> Result<Self> {
        let routes = RoutingTable::build(config.get_mode(), config.get_forward_table())?;

        let (certificates, tls_acceptor) = match config.get_mode() {
            ProxyMode::Terminate => {
                let store = Arc::new(CertificateStore::load_dir(config.get_cert_dir(), config.get_sni_fallback()).await?);
                if store.is_empty() {
                    warn!("No certificates found in {}; every TLS handshake will fail", config.get_cert_dir());
                }
                let server_config = store.clone().server_config().context("Failed to build TLS server config")?;
                (Some(store), Some(TlsAcceptor::from(Arc::new(server_config))))
            }
            ProxyMode::Passthrough => (None, None),
        };

        Ok(Self { config, routes, certificates, tls_acceptor })
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn get_routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn get_certificates(&self) -> Option<&CertificateStore> {
        self.certificates.as_deref()
    }

    pub fn get_tls_acceptor(&self) -> Option<&TlsAcceptor> {
        self.tls_acceptor.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ForwardingEntry;

    #[tokio::test]
    async fn test_build_terminate_state() {
        let certs = tempfile::tempdir().unwrap();
        crate::tls::cert_store::tests::write_host_cert(certs.path(), "a.example.com");
        let config = Config::new(
            "./hostmux.json",
            vec![ForwardingEntry::new("a.example.com", "", 8081), ForwardingEntry::new("default", "127.0.0.1", 8080)],
        )
        .with_cert_dir(certs.path().to_string_lossy());

        let state = ProxyState::build(config).await.unwrap();
        assert!(state.get_tls_acceptor().is_some());
        assert_eq!(state.get_certificates().map(|c| c.len()), Some(1));
        assert_eq!(state.get_routes().lookup("A.EXAMPLE.COM").entry.get_port(), 8081);
    }

    #[tokio::test]
    async fn test_build_passthrough_state_skips_certificates() {
        let config = Config::new("./hostmux.json", vec![ForwardingEntry::new("default", "10.0.0.1", 443)])
            .with_mode(ProxyMode::Passthrough)
            .with_cert_dir("/nonexistent/hostmux/certs");

        let state = ProxyState::build(config).await.unwrap();
        assert!(state.get_tls_acceptor().is_none());
        assert!(state.get_certificates().is_none());
    }

    #[tokio::test]
    async fn test_missing_cert_dir_is_fatal() {
        let config = Config::new("./hostmux.json", vec![ForwardingEntry::new("default", "127.0.0.1", 8080)])
            .with_cert_dir("/nonexistent/hostmux/certs");
        assert!(ProxyState::build(config).await.is_err());
    }
}
