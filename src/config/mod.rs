// Configuration module
//
// - types: the config file model
// - loader: reading and parsing the JSON file
// - validator: startup checks
// - manager: the live snapshot shared by the listeners
// - watcher: file watching and SIGHUP reloads

pub mod loader;
pub mod manager;
pub mod types;
pub mod validator;
pub mod watcher;

pub use types::{Config, DEFAULT_ENTRY, ForwardingEntry, ProxyMode};
