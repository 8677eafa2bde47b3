// Proxy module
//
// Listeners and the engines behind them:
// - http_server: plaintext listener (ACME challenges, redirect to HTTPS)
// - https_server: TLS-terminating listener
// - request_handler: reverse proxy request engine
// - websocket: WebSocket tunnel
// - passthrough: raw TLS listener routed by SNI
// - pump: relay loop shared by the tunnel and the passthrough splice
// - headers: hop-by-hop and forwarding header handling
// - client: shared upstream connections

pub mod client;
pub mod headers;
pub mod http_server;
pub mod https_server;
pub mod passthrough;
pub mod pump;
pub mod request_handler;
pub mod websocket;

pub use http_server::start_http_server;
pub use https_server::start_https_server;
pub use passthrough::start_passthrough_server;
