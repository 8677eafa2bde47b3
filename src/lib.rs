pub mod config;
pub mod forwarding;
pub mod proxy;
pub mod state;
pub mod tls;
pub mod utils;
