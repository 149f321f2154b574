//! Settings file watcher
//!
//! Watches the settings file and reloads the policy when it changes.
//! Editors often replace files instead of writing in place, so the parent
//! directory is watched and events are filtered by file name.

use crate::config::Settings;
use crate::policy::PolicyHandle;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Configuration for the settings watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period before a burst of events triggers a reload
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
        }
    }
}

/// Reloads the policy whenever the settings file changes
pub struct SettingsWatcher {
    path: PathBuf,
    settings: watch::Receiver<Settings>,
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
}

impl SettingsWatcher {
    /// Start watching `path`
    ///
    /// Must run inside a tokio runtime. The initial settings are read
    /// immediately; an invalid file at that point is an error, later
    /// invalid edits are logged and the previous policy stays in force.
    pub fn start(
        path: impl AsRef<Path>,
        policy: PolicyHandle,
        config: WatcherConfig,
    ) -> Result<Self, WatcherError> {
        let path = path.as_ref().to_path_buf();
        let initial = Settings::load(&path).map_err(|e| WatcherError::Settings(e.to_string()))?;
        let (settings_tx, settings_rx) = watch::channel(initial);

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .map_err(|e| WatcherError::Io(format!("Failed to create {}: {}", dir.display(), e)))?;

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(100);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = event_tx.blocking_send(event);
            }
        })
        .map_err(WatcherError::WatcherInit)?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(WatcherError::WatcherInit)?;
        tracing::info!(path = %path.display(), "Watching settings file");

        let target = path.clone();
        let debounce = config.debounce;
        tokio::spawn(async move {
            let mut deadline: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Settings watcher shutting down");
                        break;
                    }

                    Some(event) = event_rx.recv() => {
                        if event.paths.iter().any(|p| p.file_name() == target.file_name()) {
                            deadline = Some(tokio::time::Instant::now() + debounce);
                        }
                    }

                    _ = async {
                        match deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        deadline = None;
                        Self::reload(&target, &policy, &settings_tx);
                    }
                }
            }
        });

        Ok(Self {
            path,
            settings: settings_rx,
            _watcher: watcher,
            shutdown_tx,
        })
    }

    fn reload(path: &Path, policy: &PolicyHandle, settings_tx: &watch::Sender<Settings>) {
        match Settings::load(path) {
            Ok(settings) => {
                policy.reload(settings.policy_config());
                settings_tx.send_replace(settings);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid settings change");
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest successfully loaded settings
    pub fn settings(&self) -> watch::Receiver<Settings> {
        self.settings.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Errors that can occur while starting the watcher
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Failed to initialize watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Settings error: {0}")]
    Settings(String),
}
