use crate::config::types::Config;
use crate::state::ProxyState;
use anyhow::Result;
use arc_swap::ArcSwap;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Owner of the live [`ProxyState`] snapshot.
///
/// Readers take a cheap `Arc` with [`StateHandle::load`]; reloads build a
/// complete new snapshot and publish it with a single atomic swap.
pub struct StateHandle {
    current: ArcSwap<ProxyState>,
    path: PathBuf,
    // serializes reloads triggered by the watcher and by SIGHUP
    reloading: Mutex<()>,
}

impl StateHandle {
    pub fn new(state: ProxyState) -> Arc<Self> {
        let path = state.get_config().get_path().clone();
        Arc::new(Self { current: ArcSwap::from_pointee(state), path, reloading: Mutex::new(()) })
    }

    pub fn load(&self) -> Arc<ProxyState> {
        self.current.load_full()
    }

    pub fn publish(&self, state: ProxyState) {
        self.current.store(Arc::new(state));
    }

    pub fn get_path(&self) -> &PathBuf {
        &self.path
    }

    /// Re-read the config file and certificates and swap them in.
    /// On any failure the running snapshot stays in place.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.reloading.lock().await;
        match self.try_reload().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Failed to reload config, keeping the running one: {:#}", e);
                Err(e)
            }
        }
    }

    async fn try_reload(&self) -> Result<()> {
        let running = self.load();
        let mut config = Config::try_load(&self.path).await?;
        if running.get_config().requires_restart(&config) {
            warn!("Changes to mode, listen address, ports, skip_verify or connect_timeout_secs take effect after a restart");
            config.keep_restart_settings(running.get_config());
        }
        let state = ProxyState::build(config).await?;
        info!("Reloaded config: {} route(s)", state.get_routes().len());
        self.publish(state);
        Ok(())
    }
}
