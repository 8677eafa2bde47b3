use crate::config::manager::StateHandle;
use crate::proxy::client::UpstreamClients;
use crate::proxy::request_handler::handle_request;
use anyhow::{Context, Result};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Request, Response, StatusCode};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Start the TLS-terminating server that feeds the reverse proxy engine.
pub async fn start_https_server(handle: Arc<StateHandle>, clients: UpstreamClients) -> Result<()> {
    let addr = handle.load().get_config().tls_addr()?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("Failed to bind HTTPS server on {}", addr))?;
    info!("HTTPS server running on {}", addr);
    serve_https(listener, handle, clients).await
}

pub async fn serve_https(listener: TcpListener, handle: Arc<StateHandle>, clients: UpstreamClients) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("HTTPS accept error: {}", e);
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
        };

        // the acceptor of the snapshot live at accept time picks the certificate
        let Some(acceptor) = handle.load().get_tls_acceptor().cloned() else {
            error!("No TLS acceptor in the running config; dropping connection from {}", peer);
            continue;
        };
        let handle = handle.clone();
        let clients = clients.clone();

        tokio::spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
            };

            let service = service_fn(move |req: Request<Body>| {
                let state = handle.load();
                let clients = clients.clone();
                async move {
                    match handle_request(&state, &clients, peer, req).await {
                        Ok(resp) => Ok::<Response<Body>, Infallible>(resp),
                        Err(e) => {
                            error!("HTTPS handle_request error from {}: {}", peer.ip(), e);
                            let mut resp = Response::new(Body::empty());
                            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            Ok::<Response<Body>, Infallible>(resp)
                        }
                    }
                }
            });

            let mut http = Http::new();
            http.http1_only(true);
            http.http1_keep_alive(true);
            let conn = http.serve_connection(tls, service).with_upgrades();
            if let Err(e) = conn.await {
                debug!("HTTPS connection error from {}: {}", peer, e);
            }
        });
    }
}
