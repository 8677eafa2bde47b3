use crate::utils::host::normalize_host;
use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls_pemfile::{certs, private_key};
use std::collections::HashMap;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

pub const CHAIN_FILE: &str = "fullchain.pem";
pub const KEY_FILE: &str = "privkey.pem";

/// Hostname → certificate map consulted during the TLS handshake.
///
/// Immutable once built; a reload builds a new store and swaps it in.
#[derive(Debug, Default)]
pub struct CertificateStore {
    certificates: HashMap<String, Arc<CertifiedKey>>,
    fallback: Option<Arc<CertifiedKey>>,
}

impl CertificateStore {
    /// Load one `{hostname}/fullchain.pem` + `{hostname}/privkey.pem` pair per
    /// subdirectory of `dir`. Any pair that fails to load fails the whole store.
    pub async fn load_dir(dir: impl AsRef<Path>, sni_fallback: Option<&str>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir).await.with_context(|| format!("Cannot open certificate directory {}", dir.display()))?;

        let mut hosts = Vec::new();
        while let Some(entry) = entries.next_entry().await.with_context(|| format!("Cannot list certificate directory {}", dir.display()))? {
            let file_type = entry.file_type().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !file_type.is_dir() || name.starts_with('.') {
                debug!("Skipping {} in certificate directory", name);
                continue;
            }
            hosts.push(name);
        }
        hosts.sort();

        let mut store = Self::default();
        for host in hosts {
            let chain_path = dir.join(&host).join(CHAIN_FILE);
            let key_path = dir.join(&host).join(KEY_FILE);
            let chain = tokio::fs::read(&chain_path).await.with_context(|| format!("Failed to read certificate chain {}", chain_path.display()))?;
            let key = tokio::fs::read(&key_path).await.with_context(|| format!("Failed to read private key {}", key_path.display()))?;
            let certified = certified_key_from_pem(&chain, &key).with_context(|| format!("Failed to load certificate for {}", host))?;
            debug!("Loaded certificate for {}", host);
            store.insert(&host, Arc::new(certified));
        }

        if let Some(host) = sni_fallback {
            store.set_fallback(host)?;
        }
        info!("Loaded {} certificate(s) from {}", store.len(), dir.display());
        Ok(store)
    }

    pub fn insert(&mut self, hostname: &str, key: Arc<CertifiedKey>) {
        self.certificates.insert(normalize_host(hostname), key);
    }

    /// Serve `hostname`'s certificate to clients that send no SNI.
    pub fn set_fallback(&mut self, hostname: &str) -> Result<()> {
        let key = self
            .certificates
            .get(&normalize_host(hostname))
            .cloned()
            .ok_or_else(|| anyhow!("default_sni_host {} has no certificate", hostname))?;
        self.fallback = Some(key);
        Ok(())
    }

    /// Exact, case-insensitive match on the SNI value. The fallback only
    /// applies when the client sent no SNI at all.
    pub fn lookup(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        match server_name {
            Some(name) => self.certificates.get(&normalize_host(name)).cloned(),
            None => self.fallback.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Build a server config that resolves certificates from this store.
    pub fn server_config(self: Arc<Self>) -> Result<ServerConfig> {
        let mut config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(self);
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl ResolvesServerCert for CertificateStore {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let name = client_hello.server_name();
        let found = self.lookup(name);
        if found.is_none() {
            debug!("No certificate for SNI {:?}", name);
        }
        found
    }
}

/// Parse a PEM chain and private key into a signing-ready pair.
pub fn certified_key_from_pem(chain_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey> {
    let chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(chain_pem)).collect::<std::io::Result<Vec<_>>>().context("Invalid certificate PEM")?;
    if chain.is_empty() {
        return Err(anyhow!("No certificates found in {}", CHAIN_FILE));
    }
    let key: PrivateKeyDer<'static> = private_key(&mut BufReader::new(key_pem))
        .context("Invalid private key PEM")?
        .ok_or_else(|| anyhow!("No private key found in {}", KEY_FILE))?;
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key).map_err(|e| anyhow!("Unsupported private key type: {}", e))?;
    Ok(CertifiedKey::new(chain, signing_key))
}
