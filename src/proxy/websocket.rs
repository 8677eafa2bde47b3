use crate::proxy::client::UpstreamClients;
use crate::proxy::headers::{sanitize_request_headers, sanitize_response_headers};
use crate::proxy::pump::{PumpReport, Step, Teardown, Transfer, pump, run_pair};
use crate::proxy::request_handler::{Upstream, text_response};
use anyhow::Result;
use futures_util::StreamExt;
use hyper::header::{self, HeaderValue};
use hyper::http::Version;
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Negotiation headers owned by each leg's own handshake.
const HANDSHAKE_HEADERS: [header::HeaderName; 7] = [
    header::UPGRADE,
    header::CONNECTION,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_PROTOCOL,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::HOST,
];

/// Relays whole messages between two WebSocket connections.
#[derive(Debug, Clone, Copy)]
pub struct MessageTransfer {
    label: &'static str,
}

impl MessageTransfer {
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl Transfer for MessageTransfer {
    type Item = Message;
    type Error = WsError;

    fn classify(&self, message: Message) -> Step<Message> {
        match message {
            Message::Text(text) => {
                debug!("{}: text {}", self.label, text);
                Step::Forward(Message::Text(text))
            }
            Message::Binary(data) => {
                debug!("{}: binary {} bytes {:02x?}", self.label, data.len(), &data[..data.len().min(32)]);
                Step::Forward(Message::Binary(data))
            }
            // control frames are answered by each leg itself
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Step::Skip,
            Message::Close(frame) => {
                debug!("{}: close {:?}", self.label, frame);
                Step::Finish(Some(Message::Close(translate_close(frame))))
            }
        }
    }

    fn on_source_end(&self, _error: Option<&WsError>) -> Option<Message> {
        // abnormal closure, which has no wire form
        Some(Message::Close(None))
    }
}

/// Drop close codes that must never appear in a close frame on the wire.
pub fn translate_close(frame: Option<CloseFrame<'static>>) -> Option<CloseFrame<'static>> {
    frame.filter(|f| !matches!(f.code, CloseCode::Status | CloseCode::Abnormal | CloseCode::Tls))
}

/// Relay messages both ways until both directions have closed.
pub async fn run_tunnel<D, U>(downstream: WebSocketStream<D>, upstream: WebSocketStream<U>) -> (PumpReport, PumpReport)
where
    D: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (down_sink, down_stream) = downstream.split();
    let (up_sink, up_stream) = upstream.split();
    let to_upstream = MessageTransfer::new("down->up");
    let to_downstream = MessageTransfer::new("up->down");

    let (outbound, inbound) = run_pair(
        pump(to_upstream.label, down_stream, up_sink, &to_upstream),
        pump(to_downstream.label, up_stream, down_sink, &to_downstream),
        Teardown::BothDone,
    )
    .await;
    (outbound.unwrap_or_default(), inbound.unwrap_or_default())
}

/// Complete a WebSocket upgrade by dialing the upstream first and only then
/// accepting the client, so a refused upstream handshake can be relayed as-is.
pub async fn proxy_websocket(
    peer: SocketAddr,
    mut req: Request<Body>,
    upstream: &Upstream,
    clients: &UpstreamClients,
    connect_timeout: Duration,
) -> Result<Response<Body>> {
    let key = req.headers().get(header::SEC_WEBSOCKET_KEY).cloned();
    let version_ok = req.headers().get(header::SEC_WEBSOCKET_VERSION).map(|v| v.as_bytes() == b"13").unwrap_or(false);
    let Some(key) = key.filter(|_| version_ok) else {
        warn!("Rejecting WebSocket request from {} with a missing key or unsupported version", peer.ip());
        return text_response(StatusCode::BAD_REQUEST, "Bad Request");
    };

    let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = upstream.url(upstream.ws_scheme(), path_and_query);
    let Ok(uri) = upstream.url(upstream.http_scheme(), path_and_query).parse::<Uri>() else {
        warn!("Invalid WebSocket upstream {}", url);
        return text_response(StatusCode::BAD_REQUEST, "Bad Request");
    };
    let host = match &upstream.host_header {
        Some(host) => HeaderValue::from_str(host)?,
        None => match req.headers().get(header::HOST) {
            Some(host) => host.clone(),
            None => HeaderValue::from_str(&upstream.host)?,
        },
    };

    let mut headers = req.headers().clone();
    sanitize_request_headers(&mut headers, peer.ip(), true);
    for name in HANDSHAKE_HEADERS {
        headers.remove(name);
    }
    // the upstream leg gets its own key
    let upstream_key = generate_key();
    headers.insert(header::HOST, host);
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
    headers.insert(header::SEC_WEBSOCKET_KEY, HeaderValue::from_str(&upstream_key)?);

    let mut upstream_req = Request::builder().method(Method::GET).uri(uri).version(Version::HTTP_11).body(Body::empty())?;
    *upstream_req.headers_mut() = headers;

    let mut upstream_res = match tokio::time::timeout(connect_timeout, clients.http().request(upstream_req)).await {
        Ok(Ok(upstream_res)) => upstream_res,
        Ok(Err(e)) => {
            warn!("Failed to dial WebSocket upstream {}: {}", url, e);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }
        Err(_) => {
            warn!("Timed out dialing WebSocket upstream {}", url);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }
    };

    if upstream_res.status() != StatusCode::SWITCHING_PROTOCOLS {
        // the body streams through as the upstream sends it
        warn!("WebSocket upstream {} refused the handshake with {}", url, upstream_res.status());
        sanitize_response_headers(upstream_res.headers_mut());
        return Ok(upstream_res);
    }
    let accepted = upstream_res.headers().get(header::SEC_WEBSOCKET_ACCEPT).map(|v| v.as_bytes() == derive_accept_key(upstream_key.as_bytes()).as_bytes());
    if accepted != Some(true) {
        warn!("WebSocket upstream {} answered with a bad Sec-WebSocket-Accept", url);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
    }

    let client_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let upstream_io = match hyper::upgrade::on(upstream_res).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("WebSocket upgrade to {} failed: {}", url, e);
                return;
            }
        };
        let client_io = match client_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("WebSocket upgrade from {} failed: {}", peer.ip(), e);
                return;
            }
        };
        let downstream = WebSocketStream::from_raw_socket(client_io, Role::Server, None).await;
        let upstream_ws = WebSocketStream::from_raw_socket(upstream_io, Role::Client, None).await;
        let (outbound, inbound) = run_tunnel(downstream, upstream_ws).await;
        info!("WebSocket tunnel for {} closed: {} message(s) up, {} down", peer.ip(), outbound.forwarded, inbound.forwarded);
    });

    Ok(Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_ACCEPT, derive_accept_key(key.as_bytes()))
        .body(Body::empty())?)
}
