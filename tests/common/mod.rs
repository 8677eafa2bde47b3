#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// A TLS 1.2-style ClientHello record carrying `server_name` in its SNI extension.
pub fn client_hello(server_name: &str) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x42; 32]);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x02, 0xc0, 0x2f]);
    body.extend_from_slice(&[0x01, 0x00]);

    let mut entry = vec![0x00];
    entry.extend_from_slice(&(server_name.len() as u16).to_be_bytes());
    entry.extend_from_slice(server_name.as_bytes());
    let mut sni = (entry.len() as u16).to_be_bytes().to_vec();
    sni.extend_from_slice(&entry);

    let mut extensions = vec![0x00, 0x00];
    extensions.extend_from_slice(&(sni.len() as u16).to_be_bytes());
    extensions.extend_from_slice(&sni);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

/// Write a self-signed certificate for `host` in the cert dir layout and return it.
pub fn write_host_cert(root: &Path, host: &str) -> CertificateDer<'static> {
    let generated = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
    let dir = root.join(host);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("fullchain.pem"), generated.cert.pem()).unwrap();
    std::fs::write(dir.join("privkey.pem"), generated.key_pair.serialize_pem()).unwrap();
    generated.cert.der().clone()
}

pub async fn local_listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// A loopback port nothing listens on.
pub async fn dead_port() -> u16 {
    let listener = local_listener().await;
    listener.local_addr().unwrap().port()
}

/// Open a TLS connection to `port`, presenting `server_name` and trusting `roots`.
pub async fn tls_connect(port: u16, server_name: &str, roots: &[CertificateDer<'static>]) -> TlsStream<TcpStream> {
    let mut store = RootCertStore::empty();
    for root in roots {
        store.add(root.clone()).unwrap();
    }
    let config = ClientConfig::builder_with_provider(Arc::new(tokio_rustls::rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(store)
        .with_no_client_auth();

    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let name = ServerName::try_from(server_name.to_string()).unwrap();
    TlsConnector::from(Arc::new(config)).connect(name, tcp).await.unwrap()
}
