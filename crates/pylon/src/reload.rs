//! Hot reconfiguration.
//!
//! A [`ConfigReloader`] re-reads the configuration file, validates it and
//! stores the resulting [`EngineSettings`] in the shared [`SettingsHandle`].
//! Requests already in flight keep the snapshot they started with. A reload
//! that fails leaves the current settings in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pylon_config::{ConfigError, ConfigLoader, ConfigWatcher, FileChangeKind, PylonConfig};
use pylon_engine::{EngineSettings, SettingsHandle};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reloads engine settings from a configuration file.
#[derive(Debug, Clone)]
pub struct ConfigReloader {
    path: PathBuf,
    env_prefix: Option<String>,
    settings: SettingsHandle,
}

impl ConfigReloader {
    /// Creates a reloader that writes into `settings`.
    pub fn new(path: impl Into<PathBuf>, settings: SettingsHandle) -> Self {
        Self {
            path: path.into(),
            env_prefix: None,
            settings,
        }
    }

    /// Applies environment overrides with this prefix on every reload.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// The watched configuration file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and validates the file without applying it.
    ///
    /// # Errors
    ///
    /// Returns the loader's error if the file cannot be read, parsed or
    /// validated.
    pub fn load(&self) -> Result<PylonConfig, ConfigError> {
        let mut loader = ConfigLoader::new().with_file(&self.path)?;
        if let Some(prefix) = &self.env_prefix {
            loader = loader.with_env_prefix(prefix);
        }
        loader.load()
    }

    /// Loads the file and stores the new settings.
    ///
    /// # Errors
    ///
    /// Returns the loader's error; the stored settings are left unchanged.
    pub fn reload(&self) -> Result<Arc<EngineSettings>, ConfigError> {
        let config = self.load()?;
        self.settings.store(config.engine.to_settings());

        let current = self.settings.load();
        info!(
            path = %self.path.display(),
            max_include_depth = current.max_include_depth(),
            max_call_depth = current.max_call_depth(),
            "configuration reloaded"
        );
        Ok(current)
    }

    /// Spawns a task that reloads whenever `watcher` reports a change.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self, mut watcher: ConfigWatcher) -> ReloadTask {
        let handle = tokio::spawn(async move {
            while let Some(event) = watcher.next().await {
                if event.kind == FileChangeKind::Deleted {
                    warn!(
                        path = %event.path.display(),
                        "configuration file removed; keeping current settings"
                    );
                    continue;
                }

                if let Err(error) = self.reload() {
                    warn!(
                        path = %self.path.display(),
                        %error,
                        "configuration reload failed; keeping previous settings"
                    );
                }
            }
            debug!("configuration watcher stopped");
        });

        ReloadTask { handle }
    }
}

/// Handle to a running reload task. Dropping it stops the task.
#[derive(Debug)]
pub struct ReloadTask {
    handle: JoinHandle<()>,
}

impl ReloadTask {
    /// Returns true once the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for ReloadTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
