// TLS module
//
// - cert_store: per-hostname certificates for the terminating listener
// - client_hello: SNI sniffing for the passthrough listener

pub mod cert_store;
pub mod client_hello;

pub use cert_store::CertificateStore;
pub use client_hello::{ClientHello, ClientHelloError, read_client_hello};
