//! Engine assembly.
//!
//! [`Engine`] wires a loaded [`PylonConfig`] into a ready
//! [`RequestProcessor`]: the engine section becomes the shared
//! [`SettingsHandle`], filters are registered on a [`FilterManager`], and
//! request summaries go to a [`MetricsSink`] unless another sink is given.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pylon_config::{ConfigLoader, ConfigWatcher, LogFormat, PylonConfig};
use pylon_engine::{
    ErrorHandler, FilterManager, HandlerResolver, RequestProcessor, SettingsHandle, TelemetrySink,
};
use pylon_telemetry::{init_logging, init_metrics, LogConfig, MetricsConfig, MetricsSink};
use tracing::info;

use crate::error::{PylonError, PylonResult};
use crate::reload::{ConfigReloader, ReloadTask};

/// A configured request processor and its filter registry.
///
/// # Example
///
/// ```
/// use pylon::Engine;
/// use pylon::config::{EngineConfig, PylonConfig};
///
/// let engine = Engine::builder()
///     .config(PylonConfig::builder()
///         .engine(EngineConfig { max_include_depth: 8, ..Default::default() })
///         .build())
///     .build()
///     .unwrap();
///
/// assert_eq!(engine.settings().load().max_include_depth(), 8);
/// assert!(engine.filters().is_empty());
/// ```
pub struct Engine {
    processor: Arc<RequestProcessor>,
    filters: Arc<FilterManager>,
    config: PylonConfig,
    config_path: Option<PathBuf>,
    env_prefix: Option<String>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("config_path", &self.config_path)
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The request processor.
    #[must_use]
    pub fn processor(&self) -> &Arc<RequestProcessor> {
        &self.processor
    }

    /// The filter registry the processor reads.
    #[must_use]
    pub fn filters(&self) -> &Arc<FilterManager> {
        &self.filters
    }

    /// The settings handle shared with the processor.
    #[must_use]
    pub fn settings(&self) -> &SettingsHandle {
        self.processor.settings()
    }

    /// The configuration the engine was built from.
    #[must_use]
    pub fn config(&self) -> &PylonConfig {
        &self.config
    }

    /// The configuration file, if the engine was built from one.
    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Installs logging and, when enabled, the metrics exporter.
    ///
    /// Call once per process from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PylonError::Telemetry` if either subsystem fails to start.
    pub fn init_telemetry(&self) -> PylonResult<()> {
        init_logging(&log_config(&self.config))?;
        init_metrics(&metrics_config(&self.config))?;
        Ok(())
    }

    /// Returns a reloader bound to this engine's file and settings.
    ///
    /// # Errors
    ///
    /// Returns `PylonError::NoConfigFile` if the engine has no file.
    pub fn reloader(&self) -> PylonResult<ConfigReloader> {
        let path = self.config_path.clone().ok_or(PylonError::NoConfigFile)?;
        let reloader = ConfigReloader::new(path, self.settings().clone());
        Ok(match &self.env_prefix {
            Some(prefix) => reloader.with_env_prefix(prefix.clone()),
            None => reloader,
        })
    }

    /// Re-reads the configuration file and applies its engine section.
    ///
    /// # Errors
    ///
    /// Returns `PylonError::NoConfigFile` without a file, or the loader's
    /// error; failed reloads leave the current settings in place.
    pub fn reload(&self) -> PylonResult<()> {
        self.reloader()?.reload()?;
        Ok(())
    }

    /// Watches the configuration file and reloads on every change.
    ///
    /// Must be called from within a tokio runtime. The watch stops when the
    /// returned task is dropped.
    ///
    /// # Errors
    ///
    /// Returns `PylonError::NoConfigFile` without a file, or
    /// `PylonError::Config` if the watcher cannot be started.
    pub fn watch_config(&self) -> PylonResult<ReloadTask> {
        let reloader = self.reloader()?;
        let watcher = ConfigWatcher::builder()
            .watch_file(reloader.path())?
            .build()?;
        info!(path = %reloader.path().display(), "watching configuration for changes");
        Ok(reloader.spawn(watcher))
    }
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<PylonConfig>,
    config_path: Option<PathBuf>,
    env_prefix: Option<String>,
    handler_resolver: Option<Arc<dyn HandlerResolver>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    server_info: Option<String>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl EngineBuilder {
    /// Uses an already loaded configuration.
    #[must_use]
    pub fn config(mut self, config: PylonConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loads configuration from this file. Also enables [`Engine::reload`]
    /// and [`Engine::watch_config`].
    #[must_use]
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Applies `PREFIX__SECTION__KEY` environment overrides when loading.
    #[must_use]
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Binds the handler resolver.
    #[must_use]
    pub fn handler_resolver(mut self, resolver: Arc<dyn HandlerResolver>) -> Self {
        self.handler_resolver = Some(resolver);
        self
    }

    /// Installs an error handler in front of the default error page.
    #[must_use]
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Sets the server description shown on default error pages.
    #[must_use]
    pub fn server_info(mut self, server_info: impl Into<String>) -> Self {
        self.server_info = Some(server_info.into());
        self
    }

    /// Replaces the default [`MetricsSink`].
    #[must_use]
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Loads configuration (unless one was given) and builds the engine.
    ///
    /// With neither [`config`](Self::config) nor
    /// [`config_file`](Self::config_file), defaults are used.
    ///
    /// # Errors
    ///
    /// Returns `PylonError::Config` if loading or validation fails.
    pub fn build(self) -> PylonResult<Engine> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => {
                let mut loader = ConfigLoader::new().with_defaults();
                if let Some(path) = &self.config_path {
                    loader = loader.with_file(path)?;
                }
                if let Some(prefix) = &self.env_prefix {
                    loader = loader.with_env_prefix(prefix);
                }
                loader.load()?
            }
        };

        let settings = SettingsHandle::new(config.engine.to_settings());
        let filters = Arc::new(FilterManager::new());
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(MetricsSink::new()));

        let mut builder = RequestProcessor::builder()
            .filters(filters.clone())
            .settings(settings)
            .telemetry(telemetry);
        if let Some(resolver) = self.handler_resolver {
            builder = builder.handler_resolver(resolver);
        }
        if let Some(handler) = self.error_handler {
            builder = builder.error_handler(handler);
        }
        if let Some(info) = self.server_info {
            builder = builder.server_info(info);
        }

        Ok(Engine {
            processor: Arc::new(builder.build()),
            filters,
            config,
            config_path: self.config_path,
            env_prefix: self.env_prefix,
        })
    }
}

fn log_config(config: &PylonConfig) -> LogConfig {
    let logging = &config.telemetry.logging;
    LogConfig {
        level: logging.level.to_lowercase(),
        json_format: logging.format == LogFormat::Json,
        ansi: logging.ansi_enabled,
        span_events: logging.format == LogFormat::Pretty,
        service_name: config.telemetry.service_name.clone(),
        ..LogConfig::default()
    }
}

fn metrics_config(config: &PylonConfig) -> MetricsConfig {
    MetricsConfig {
        enabled: config.telemetry.metrics.enabled,
        addr: config.telemetry.metrics.addr.clone(),
    }
}
