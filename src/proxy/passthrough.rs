//! Raw TLS multiplexing: route each connection by the SNI in its ClientHello, then splice bytes.

use crate::config::manager::StateHandle;
use crate::proxy::client::UpstreamClients;
use crate::proxy::pump::{ByteTransfer, PumpReport, Teardown, byte_sink, byte_source, pump, run_pair};
use crate::state::ProxyState;
use crate::tls::client_hello::read_client_hello;
use crate::utils::host::authority;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::TcpListenerStream;

/// Accept raw TLS connections and route each one by its ClientHello's SNI.
pub async fn start_passthrough_server(handle: Arc<StateHandle>) -> Result<()> {
    let addr = handle.load().get_config().tls_addr()?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("Failed to bind TLS passthrough listener on {}", addr))?;
    info!("TLS passthrough server running on {}", addr);
    serve_passthrough(listener, handle).await
}

pub async fn serve_passthrough(listener: TcpListener, handle: Arc<StateHandle>) -> Result<()> {
    let mut incoming = TcpListenerStream::new(listener);
    while let Some(accepted) = incoming.next().await {
        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                error!("TLS passthrough accept error: {}", e);
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
        };
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                debug!("Dropping connection without a peer address: {}", e);
                continue;
            }
        };
        // routes are taken from the snapshot live at accept time
        let state = handle.load();
        tokio::spawn(async move {
            handle_passthrough(stream, peer, state).await;
        });
    }
    warn!("TLS passthrough listener stream ended");
    Ok(())
}

/// Sniff the SNI, dial the matching upstream, replay the ClientHello and splice.
///
/// Nothing is ever written back to the client on failure; the connection is
/// simply dropped.
pub async fn handle_passthrough(mut client: TcpStream, peer: SocketAddr, state: Arc<ProxyState>) {
    let hello = match read_client_hello(&mut client).await {
        Ok(hello) => hello,
        Err(e) => {
            debug!("Dropping connection from {}: {}", peer, e);
            return;
        }
    };

    let route = state.get_routes().lookup(hello.sni());
    let target = authority(route.entry.get_host(), route.entry.get_port());
    info!(
        "Passthrough from {} for {} -> {}{}",
        peer.ip(),
        if hello.sni().is_empty() { "<no sni>" } else { hello.sni() },
        target,
        if route.is_default { " (default)" } else { "" }
    );

    let timeout = UpstreamClients::connect_timeout(state.get_config());
    let mut upstream = match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(e)) => {
            warn!("Failed to connect to {} for {}: {}", target, peer, e);
            return;
        }
        Err(_) => {
            warn!("Timed out connecting to {} for {}", target, peer);
            return;
        }
    };

    if let Err(e) = upstream.write_all(hello.record()).await {
        warn!("Failed to replay ClientHello to {}: {}", target, e);
        return;
    }

    let (outbound, inbound) = splice(client, upstream).await;
    debug!(
        "Passthrough from {} to {} finished ({} finished first)",
        peer,
        target,
        if outbound.is_some() { "client" } else if inbound.is_some() { "upstream" } else { "neither" }
    );
}

/// Copy bytes both ways; both sockets are closed as soon as either direction ends.
pub async fn splice(client: TcpStream, upstream: TcpStream) -> (Option<PumpReport>, Option<PumpReport>) {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();
    run_pair(
        pump("client->upstream", byte_source(client_read), byte_sink(upstream_write), &ByteTransfer),
        pump("upstream->client", byte_source(upstream_read), byte_sink(client_write), &ByteTransfer),
        Teardown::EitherDone,
    )
    .await
}
