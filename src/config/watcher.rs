use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;

use crate::error::{AppError, Result};

use super::loader::load_or_builtin;
use super::validator::validate_config;
use super::Config;

/// Keeps the active configuration in sync with the file on disk.
///
/// Subscribers receive every successfully validated reload; invalid edits are
/// logged and the previous configuration stays active.
pub struct ConfigWatcher {
    path: PathBuf,
    current: RwLock<Arc<Config>>,
    updates_tx: watch::Sender<Arc<Config>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, initial: Config) -> Self {
        let initial = Arc::new(initial);
        let (updates_tx, _) = watch::channel(Arc::clone(&initial));
        Self {
            path: path.into(),
            current: RwLock::new(initial),
            updates_tx,
            watcher: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The returned receiver immediately holds the latest configuration.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.updates_tx.subscribe()
    }

    /// Reload from disk and broadcast when the configuration changed.
    /// Returns whether a new configuration was published.
    pub fn refresh(&self) -> Result<bool> {
        let config = load_or_builtin(&self.path)?;
        validate_config(&config)?;

        let next = Arc::new(config);
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if **current == *next {
                return Ok(false);
            }
            *current = Arc::clone(&next);
        }

        info!("Configuration reloaded from {}", self.path.display());
        if self.updates_tx.receiver_count() == 0 {
            debug!("No subscribers for configuration updates yet");
        }
        self.updates_tx.send_replace(next);
        Ok(true)
    }

    /// Begin watching the configuration file's directory. Multiple invocations are no-ops.
    pub fn start_watching(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        let this = Arc::clone(self);
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) if is_relevant_event(&event.kind) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|path| path.file_name().map(|n| n.to_os_string()) == file_name);
                    if !touches_config {
                        return;
                    }
                    if let Err(err) = this.refresh() {
                        warn!("Ignoring configuration change: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("Configuration watch error: {err}"),
            })
            .map_err(|err| AppError::message(format!("Failed to start watcher: {err}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::message(format!(
                    "Failed to watch configuration directory {}: {err}",
                    dir.display()
                ))
            })?;
        *slot = Some(watcher);
        Ok(())
    }
}

fn is_relevant_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::AccessMode;

    const PROXY_CONFIG: &str = r#"{ "accessMode": "proxy", "autoRefreshSeconds": 15 }"#;

    #[test]
    fn refresh_publishes_changed_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("quotewatch.json");
        fs::write(&path, PROXY_CONFIG).expect("write");

        let initial = load_or_builtin(&path).expect("load");
        let watcher = ConfigWatcher::new(&path, initial);
        let mut updates = watcher.subscribe();
        assert!(!watcher.refresh().expect("unchanged"));

        fs::write(
            &path,
            r#"{ "accessMode": "proxy", "autoRefreshSeconds": 60 }"#,
        )
        .expect("rewrite");
        assert!(watcher.refresh().expect("changed"));
        assert!(updates.has_changed().expect("sender alive"));
        assert_eq!(updates.borrow_and_update().auto_refresh_seconds, 60);
        assert_eq!(watcher.current().access_mode, AccessMode::Proxy);
    }

    #[test]
    fn reload_without_subscribers_reaches_later_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("quotewatch.json");
        fs::write(&path, PROXY_CONFIG).expect("write");

        let watcher = ConfigWatcher::new(&path, load_or_builtin(&path).expect("load"));
        fs::write(
            &path,
            r#"{ "accessMode": "proxy", "autoRefreshSeconds": 45 }"#,
        )
        .expect("rewrite");
        assert!(watcher.refresh().expect("changed"));

        let updates = watcher.subscribe();
        assert_eq!(updates.borrow().auto_refresh_seconds, 45);
    }

    #[test]
    fn invalid_reload_keeps_previous_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("quotewatch.json");
        fs::write(&path, PROXY_CONFIG).expect("write");

        let watcher = ConfigWatcher::new(&path, load_or_builtin(&path).expect("load"));
        fs::write(&path, r#"{ "accessMode": "proxy", "proxyUrl": "" }"#).expect("rewrite");

        assert!(watcher.refresh().is_err());
        assert_eq!(watcher.current().auto_refresh_seconds, 15);
    }
}
