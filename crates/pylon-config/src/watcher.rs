//! File watching for configuration hot-reload.
//!
//! [`ConfigWatcher`] reports changes to configuration files. It watches the
//! directory holding each file, so editors that save by writing a temporary
//! file and renaming it over the old one are seen as a change too.
//!
//! Bursts of events for the same save are coalesced: after the first relevant
//! event the watcher waits for the debounce window to pass quietly and then
//! reports the last change it saw.
//!
//! # Example
//!
//! ```no_run
//! use pylon_config::ConfigWatcher;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), pylon_config::ConfigError> {
//! let mut watcher = ConfigWatcher::builder()
//!     .with_debounce(Duration::from_millis(250))
//!     .watch_file("pylon.toml")?
//!     .build()?;
//!
//! while let Some(event) = watcher.next().await {
//!     println!("{} changed", event.path.display());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::ConfigError;

/// A debounced change to a watched file.
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Path to the changed file.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: FileChangeKind,
    /// When the change was detected.
    pub timestamp: Instant,
}

/// Kind of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// File was created.
    Created,
    /// File was modified.
    Modified,
    /// File was deleted.
    Deleted,
}

impl FileChangeKind {
    fn from_event_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Deleted),
            EventKind::Access(_) | EventKind::Other | EventKind::Any => None,
        }
    }
}

/// Builder for a [`ConfigWatcher`].
#[derive(Debug)]
pub struct ConfigWatcherBuilder {
    debounce: Duration,
    files: Vec<PathBuf>,
}

impl Default for ConfigWatcherBuilder {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            files: Vec::new(),
        }
    }
}

impl ConfigWatcherBuilder {
    /// Set the debounce window. Default is 500ms.
    #[must_use]
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    /// Add a configuration file to watch.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::FileNotFound` if the file does not exist.
    pub fn watch_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::file_not_found(path));
        }
        self.files.push(path.canonicalize()?);
        Ok(self)
    }

    /// Start watching.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Watcher` if no file was added or the platform
    /// watcher cannot be created.
    pub fn build(self) -> Result<ConfigWatcher, ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::watcher("no files configured for watching"));
        }

        let (tx, rx) = mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                // receiver gone means the watcher is shutting down
                let _ = tx.blocking_send(event);
            }
        })
        .map_err(|e| ConfigError::watcher(format!("failed to create file watcher: {e}")))?;

        let mut names = HashSet::new();
        let mut dirs = HashSet::new();
        for file in &self.files {
            if let Some(name) = file.file_name() {
                names.insert(name.to_os_string());
            }
            if let Some(dir) = file.parent() {
                dirs.insert(dir.to_path_buf());
            }
        }

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    ConfigError::watcher(format!("failed to watch {}: {e}", dir.display()))
                })?;
        }

        tracing::debug!(files = ?self.files, "watching configuration files");

        Ok(ConfigWatcher {
            _watcher: watcher,
            rx,
            names,
            debounce: self.debounce,
        })
    }
}

/// Watches configuration files and reports debounced changes.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    names: HashSet<OsString>,
    debounce: Duration,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("names", &self.names)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Create a new watcher builder.
    #[must_use]
    pub fn builder() -> ConfigWatcherBuilder {
        ConfigWatcherBuilder::default()
    }

    /// Wait for the next debounced change.
    ///
    /// Returns `None` once the underlying watcher has stopped.
    pub async fn next(&mut self) -> Option<FileChangeEvent> {
        let mut change = loop {
            let event = self.rx.recv().await?;
            if let Some(change) = self.process_event(&event) {
                break change;
            }
        };

        let deadline = tokio::time::Instant::now() + self.debounce;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => {
                    if let Some(later) = self.process_event(&event) {
                        change = later;
                    }
                }
                Ok(None) | Err(_) => return Some(change),
            }
        }
    }

    fn process_event(&self, event: &Event) -> Option<FileChangeEvent> {
        let kind = FileChangeKind::from_event_kind(&event.kind)?;
        let path = event.paths.iter().find(|path| {
            path.file_name()
                .is_some_and(|name| self.names.contains(name))
        })?;

        Some(FileChangeEvent {
            path: path.clone(),
            kind,
            timestamp: Instant::now(),
        })
    }
}
