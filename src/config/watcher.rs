//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::ProxyConfig;

/// Notifications published by the config store.
#[derive(Debug)]
pub enum ConfigEvent {
    /// First successful load.
    Loaded(ProxyConfig),
    /// A later valid revision of the file.
    Changed(ProxyConfig),
    /// A revision that failed to read, parse or validate. The previous
    /// configuration stays in effect.
    Error(ConfigError),
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ConfigEvent>,
    last_content: Arc<Mutex<Option<String>>>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration events.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ConfigEvent>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
                last_content: Arc::new(Mutex::new(None)),
            },
            update_rx,
        )
    }

    /// Load the file once and publish `Loaded`.
    ///
    /// The error is returned (not published) so startup can fail fast.
    pub fn load_initial(&self) -> Result<ProxyConfig, ConfigError> {
        let content = std::fs::read_to_string(&self.path)?;
        let config = parse_config(&content)?;
        if let Ok(mut last) = self.last_content.lock() {
            *last = Some(content);
        }
        let _ = self.update_tx.send(ConfigEvent::Loaded(config.clone()));
        Ok(config)
    }

    /// Start watching the file in a background thread.
    ///
    /// The parent directory is watched so editors that replace the file
    /// (write to temp + rename) are still observed. The returned watcher must
    /// be kept alive for events to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let last_content = self.last_content.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !touches_config {
                        return;
                    }
                    reload(&path, &last_content, &tx);
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

fn reload(
    path: &Path,
    last_content: &Mutex<Option<String>>,
    tx: &mpsc::UnboundedSender<ConfigEvent>,
) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            // Transient during atomic replace; the create event follows.
            if e.kind() == std::io::ErrorKind::NotFound {
                return;
            }
            let _ = tx.send(ConfigEvent::Error(e.into()));
            return;
        }
    };

    {
        let Ok(mut last) = last_content.lock() else {
            return;
        };
        if last.as_deref() == Some(content.as_str()) {
            return;
        }
        *last = Some(content.clone());
    }

    tracing::info!("Config file change detected, reloading...");
    match parse_config(&content) {
        Ok(config) => {
            let _ = tx.send(ConfigEvent::Changed(config));
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config. Keeping current configuration.");
            let _ = tx.send(ConfigEvent::Error(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("audit-proxy-watch-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("proxy.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_initial_publishes_loaded() {
        let path = temp_config("initial", r#"{"routes": {"api.local": {"target": "http://localhost:1"}}}"#);
        let (watcher, mut rx) = ConfigWatcher::new(&path);

        let config = watcher.load_initial().unwrap();
        assert_eq!(config.routes.len(), 1);
        assert!(matches!(rx.try_recv(), Ok(ConfigEvent::Loaded(_))));
    }

    #[test]
    fn reload_skips_unchanged_content_and_reports_errors() {
        let path = temp_config("reload", r#"{"routes": {}}"#);
        let (watcher, mut rx) = ConfigWatcher::new(&path);
        watcher.load_initial().unwrap();
        let _ = rx.try_recv();

        reload(&path, &watcher.last_content, &watcher.update_tx);
        assert!(rx.try_recv().is_err());

        std::fs::write(&path, "{ not json").unwrap();
        reload(&path, &watcher.last_content, &watcher.update_tx);
        assert!(matches!(rx.try_recv(), Ok(ConfigEvent::Error(ConfigError::Parse(_)))));

        std::fs::write(&path, r#"{"routes": {"b.local": {"target": "http://localhost:2"}}}"#).unwrap();
        reload(&path, &watcher.last_content, &watcher.update_tx);
        match rx.try_recv() {
            Ok(ConfigEvent::Changed(config)) => assert!(config.routes.contains_key("b.local")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn watcher_publishes_changes() {
        let path = temp_config("notify", r#"{"routes": {}}"#);
        let (watcher, mut rx) = ConfigWatcher::new(&path);
        watcher.load_initial().unwrap();
        let _ = rx.recv().await;
        let _guard = watcher.run().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, r#"{"routes": {"c.local": {"target": "http://localhost:3"}}}"#).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no config event")
            .expect("channel closed");
        match event {
            ConfigEvent::Changed(config) => assert!(config.routes.contains_key("c.local")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
