use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Key of the mandatory fallback entry in the forwarding table.
pub const DEFAULT_ENTRY: &str = "default";

/// How the TLS listener treats inbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Decrypt with per-host certificates and reverse-proxy HTTP(S).
    #[default]
    Terminate,
    /// Route raw TLS by the ClientHello's SNI without decrypting.
    Passthrough,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub(crate) path: PathBuf,
    #[serde(default)]
    pub(crate) mode: ProxyMode,
    // Address both listeners bind to
    #[serde(default = "default_listen")]
    pub(crate) listen: String,
    #[serde(default = "default_plain_port")]
    pub(crate) plain_port: u16,
    #[serde(default = "default_tls_port")]
    pub(crate) tls_port: u16,
    // Directory holding ACME HTTP-01 challenge files
    #[serde(default = "default_acme_dir")]
    pub(crate) acme_dir: String,
    // Directory with one {hostname}/fullchain.pem + privkey.pem pair per host
    #[serde(default = "default_cert_dir")]
    pub(crate) cert_dir: String,
    #[serde(default)]
    pub(crate) skip_verify: bool,
    #[serde(default)]
    pub(crate) sni_compat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) default_sni_host: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub(crate) connect_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) log_file: Option<String>,
    #[serde(default)]
    pub(crate) log_debug: bool,
    pub(crate) forward_table: Vec<ForwardingEntry>,
}

/// One row of the forwarding table.
///
/// `match_key` is an exact hostname in [`ProxyMode::Terminate`] and a regular
/// expression in [`ProxyMode::Passthrough`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingEntry {
    #[serde(rename = "match")]
    pub(crate) match_key: String,
    #[serde(default)]
    pub(crate) host: String,
    pub(crate) port: u16,
    #[serde(default)]
    pub(crate) override_host_header: bool,
    #[serde(default = "default_true")]
    pub(crate) override_url_host: bool,
    #[serde(default = "default_true")]
    pub(crate) tls: bool,
}

impl Config {
    /// Build a config in memory, e.g. for tests or embedding.
    pub fn new(path: impl AsRef<Path>, forward_table: Vec<ForwardingEntry>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode: ProxyMode::default(),
            listen: default_listen(),
            plain_port: default_plain_port(),
            tls_port: default_tls_port(),
            acme_dir: default_acme_dir(),
            cert_dir: default_cert_dir(),
            skip_verify: false,
            sni_compat: false,
            default_sni_host: None,
            connect_timeout_secs: default_connect_timeout(),
            log_file: None,
            log_debug: false,
            forward_table,
        }
    }

    pub fn with_mode(mut self, mode: ProxyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_ports(mut self, plain_port: u16, tls_port: u16) -> Self {
        self.plain_port = plain_port;
        self.tls_port = tls_port;
        self
    }

    pub fn with_cert_dir(mut self, cert_dir: impl Into<String>) -> Self {
        self.cert_dir = cert_dir.into();
        self
    }

    pub fn with_acme_dir(mut self, acme_dir: impl Into<String>) -> Self {
        self.acme_dir = acme_dir.into();
        self
    }

    pub fn get_path(&self) -> &PathBuf {
        &self.path
    }

    pub fn get_mode(&self) -> ProxyMode {
        self.mode
    }

    pub fn get_listen(&self) -> &str {
        &self.listen
    }

    pub fn get_plain_port(&self) -> u16 {
        self.plain_port
    }

    pub fn get_tls_port(&self) -> u16 {
        self.tls_port
    }

    pub fn get_acme_dir(&self) -> &str {
        &self.acme_dir
    }

    pub fn get_cert_dir(&self) -> &str {
        &self.cert_dir
    }

    pub fn is_skip_verify(&self) -> bool {
        self.skip_verify
    }

    /// Hostname whose certificate is presented to clients that send no SNI.
    pub fn get_sni_fallback(&self) -> Option<&str> {
        if self.sni_compat { self.default_sni_host.as_deref() } else { None }
    }

    pub fn get_connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs
    }

    pub fn get_log_file(&self) -> Option<&str> {
        self.log_file.as_deref()
    }

    pub fn is_log_debug(&self) -> bool {
        self.log_debug
    }

    pub fn get_forward_table(&self) -> &[ForwardingEntry] {
        &self.forward_table
    }

    pub fn plain_addr(&self) -> anyhow::Result<SocketAddr> {
        self.socket_addr(self.plain_port)
    }

    pub fn tls_addr(&self) -> anyhow::Result<SocketAddr> {
        self.socket_addr(self.tls_port)
    }

    fn socket_addr(&self, port: u16) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .listen
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {}", self.listen, e))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// True if applying `other` needs the listeners or the upstream client rebuilt.
    pub fn requires_restart(&self, other: &Config) -> bool {
        self.mode != other.mode
            || self.listen != other.listen
            || self.plain_port != other.plain_port
            || self.tls_port != other.tls_port
            || self.skip_verify != other.skip_verify
            || self.connect_timeout_secs != other.connect_timeout_secs
    }

    /// Copy the settings that only apply on restart from the running config.
    pub(crate) fn keep_restart_settings(&mut self, running: &Config) {
        self.mode = running.mode;
        self.listen = running.listen.clone();
        self.plain_port = running.plain_port;
        self.tls_port = running.tls_port;
        self.skip_verify = running.skip_verify;
        self.connect_timeout_secs = running.connect_timeout_secs;
    }
}

impl ForwardingEntry {
    pub fn new(match_key: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            match_key: match_key.into(),
            host: host.into(),
            port,
            override_host_header: false,
            override_url_host: true,
            tls: true,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_override_host_header(mut self, override_host_header: bool) -> Self {
        self.override_host_header = override_host_header;
        self
    }

    pub fn with_override_url_host(mut self, override_url_host: bool) -> Self {
        self.override_url_host = override_url_host;
        self
    }

    pub fn get_match_key(&self) -> &str {
        &self.match_key
    }

    pub fn get_host(&self) -> &str {
        &self.host
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn is_override_host_header(&self) -> bool {
        self.override_host_header
    }

    pub fn is_override_url_host(&self) -> bool {
        self.override_url_host
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn is_default(&self) -> bool {
        self.match_key == DEFAULT_ENTRY
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?;
        writeln!(f, "{}", json)
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_plain_port() -> u16 {
    80
}

fn default_tls_port() -> u16 {
    443
}

fn default_acme_dir() -> String {
    "./acme".to_string()
}

fn default_cert_dir() -> String {
    "./certs".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
