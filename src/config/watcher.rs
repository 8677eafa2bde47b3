use crate::config::manager::StateHandle;
use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// Editors emit several events per save; wait for them to settle before reloading.
const SETTLE_DELAY: Duration = Duration::from_millis(250);

impl StateHandle {
    /// Reload whenever the config file changes on disk.
    ///
    /// The parent directory is watched rather than the file itself so that
    /// editors which save by rename keep triggering reloads.
    pub fn watch_config_file(self: &Arc<Self>) -> Result<()> {
        let path = self.get_path().clone();
        let file_name = path.file_name().map(|n| n.to_os_string()).context("Config path has no file name")?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            NotifyConfig::default(),
        )
        .context("Failed to create config file watcher")?;
        watcher.watch(&dir, RecursiveMode::NonRecursive).with_context(|| format!("Failed to watch {}", dir.display()))?;
        info!("Watching {} for changes", path.display());

        let handle = Arc::clone(self);
        tokio::spawn(async move {
            // the watcher stops when dropped
            let _watcher = watcher;
            while let Some(res) = rx.recv().await {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Failed to receive config file event: {}", e);
                        continue;
                    }
                };
                let touches_config = event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str()));
                if !touches_config || !(event.kind.is_modify() || event.kind.is_create()) {
                    trace!("Ignoring file event: {:?}", event);
                    continue;
                }

                debug!("Config file changed, reloading");
                tokio::time::sleep(SETTLE_DELAY).await;
                while rx.try_recv().is_ok() {}
                let _ = handle.reload().await;
            }
        });
        Ok(())
    }

    /// Reload on SIGHUP.
    #[cfg(unix)]
    pub fn reload_on_hangup(self: &Arc<Self>) -> Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangups = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            while hangups.recv().await.is_some() {
                info!("Received SIGHUP, reloading config");
                let _ = handle.reload().await;
            }
        });
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn reload_on_hangup(self: &Arc<Self>) -> Result<()> {
        Ok(())
    }
}
