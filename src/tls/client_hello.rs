//! SNI extraction from a raw TLS ClientHello.
//!
//! The passthrough listener never completes a handshake. It reads exactly one
//! TLS record, decodes enough of the ClientHello inside it to find the
//! `server_name` extension, and hands back the record bytes untouched so they
//! can be replayed to the upstream.
//!
//! Record layout:
//! - byte 0: content type (22 = handshake)
//! - bytes 1-2: legacy record version
//! - bytes 3-4: payload length (big-endian)
//!
//! ClientHello layout inside the payload:
//! - msg_type(1) length(3) version(2) random(32)
//! - session_id_len(1) + session_id
//! - cipher_suites_len(2) + cipher_suites
//! - compression_methods_len(1) + compression_methods
//! - extensions_len(2) + extensions (optional)
//!
//! A ClientHello fragmented across several records is rejected.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest record payload accepted: 2^14 plaintext plus the 2048 bytes of expansion TLS allows.
pub const MAX_RECORD_LEN: usize = 16384 + 2048;

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXTENSION_SERVER_NAME: usize = 0;
const NAME_TYPE_HOST_NAME: u8 = 0;

#[derive(Debug, Error)]
pub enum ClientHelloError {
    #[error("failed to read TLS record: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a TLS handshake record (content type {0})")]
    NotHandshake(u8),
    #[error("TLS record of {0} bytes is too large")]
    RecordTooLarge(usize),
    #[error("handshake message type {0} is not a ClientHello")]
    NotClientHello(u8),
    #[error("ClientHello truncated at {0}")]
    Truncated(&'static str),
}

pub type Result<T> = std::result::Result<T, ClientHelloError>;

/// A sniffed ClientHello: the routing name plus every byte consumed to find it.
#[derive(Debug, Clone)]
pub struct ClientHello {
    server_name: Option<String>,
    record: Vec<u8>,
}

impl ClientHello {
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// The SNI value, or the empty string when the client sent none.
    pub fn sni(&self) -> &str {
        self.server_name.as_deref().unwrap_or("")
    }

    /// Record header and payload exactly as read from the client.
    pub fn record(&self) -> &[u8] {
        &self.record
    }
}

/// Read one TLS record from `stream` and extract its SNI.
///
/// Consumes exactly the 5-byte header plus the declared payload; nothing past
/// the first record is read.
pub async fn read_client_hello<R: AsyncRead + Unpin>(stream: &mut R) -> Result<ClientHello> {
    let mut header = [0u8; RECORD_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    if header[0] != CONTENT_TYPE_HANDSHAKE {
        return Err(ClientHelloError::NotHandshake(header[0]));
    }
    let length = u16::from_be_bytes([header[3], header[4]]) as usize;
    if length > MAX_RECORD_LEN {
        return Err(ClientHelloError::RecordTooLarge(length));
    }

    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + length);
    record.extend_from_slice(&header);
    record.resize(RECORD_HEADER_LEN + length, 0);
    stream.read_exact(&mut record[RECORD_HEADER_LEN..]).await?;

    let server_name = parse_server_name(&record[RECORD_HEADER_LEN..])?;
    Ok(ClientHello { server_name, record })
}

/// Decode a handshake payload and return the first `host_name` of its
/// `server_name` extension, if any.
pub fn parse_server_name(payload: &[u8]) -> Result<Option<String>> {
    let mut handshake = Cursor::new(payload);
    let msg_type = handshake.u8("handshake type")?;
    if msg_type != HANDSHAKE_CLIENT_HELLO {
        return Err(ClientHelloError::NotClientHello(msg_type));
    }
    let length = handshake.u24("handshake length")?;
    let mut hello = Cursor::new(handshake.take(length, "handshake body")?);

    hello.take(2, "client version")?;
    hello.take(32, "random")?;
    let length = hello.u8("session id length")? as usize;
    hello.take(length, "session id")?;
    let length = hello.u16("cipher suites length")?;
    hello.take(length, "cipher suites")?;
    let length = hello.u8("compression methods length")? as usize;
    hello.take(length, "compression methods")?;

    if hello.is_empty() {
        return Ok(None);
    }
    let length = hello.u16("extensions length")?;
    let mut extensions = Cursor::new(hello.take(length, "extensions")?);

    while !extensions.is_empty() {
        let ext_type = extensions.u16("extension type")?;
        let length = extensions.u16("extension length")?;
        let data = extensions.take(length, "extension data")?;
        if ext_type == EXTENSION_SERVER_NAME {
            return first_host_name(data);
        }
    }
    Ok(None)
}

fn first_host_name(data: &[u8]) -> Result<Option<String>> {
    let mut extension = Cursor::new(data);
    let length = extension.u16("server name list length")?;
    let mut names = Cursor::new(extension.take(length, "server name list")?);

    while !names.is_empty() {
        let name_type = names.u8("server name type")?;
        let length = names.u16("server name length")?;
        let name = names.take(length, "server name")?;
        if name_type == NAME_TYPE_HOST_NAME {
            // odd names still route, through the patterns or the default entry
            if name.is_empty() {
                return Ok(None);
            }
            return Ok(Some(String::from_utf8_lossy(name).into_owned()));
        }
    }
    Ok(None)
}

// Bounds-checked reader over attacker-controlled bytes.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len()).ok_or(ClientHelloError::Truncated(field))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<usize> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
    }

    fn u24(&mut self, field: &'static str) -> Result<usize> {
        let bytes = self.take(3, field)?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize)
    }
}
