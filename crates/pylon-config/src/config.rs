//! Main configuration types.
//!
//! This module provides the top-level [`PylonConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, EngineConfig, LogFormat, TelemetryConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Complete Pylon configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use pylon_config::PylonConfig;
///
/// let config = PylonConfig::default();
/// assert_eq!(config.engine.max_include_depth, 50);
/// assert_eq!(config.telemetry.service_name, "pylon");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct PylonConfig {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Telemetry configuration (logging, metrics).
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl PylonConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use pylon_config::{EngineConfig, PylonConfig};
    ///
    /// let config = PylonConfig::builder()
    ///     .engine(EngineConfig {
    ///         max_call_depth: 64,
    ///         ..Default::default()
    ///     })
    ///     .build();
    ///
    /// assert_eq!(config.engine.max_call_depth, 64);
    /// ```
    #[must_use]
    pub fn builder() -> PylonConfigBuilder {
        PylonConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - Either nesting limit is zero
    /// - The log level is not one of trace, debug, info, warn, error
    /// - Metrics are enabled and the metrics address is not a socket address
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_include_depth == 0 {
            return Err(ConfigError::invalid_value(
                "engine.max_include_depth",
                "must be at least 1",
            ));
        }

        if self.engine.max_call_depth == 0 {
            return Err(ConfigError::invalid_value(
                "engine.max_call_depth",
                "must be at least 1",
            ));
        }

        let level = self.telemetry.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::invalid_value(
                "telemetry.logging.level",
                format!(
                    "unknown level '{}', expected one of {}",
                    self.telemetry.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            ));
        }

        if self.telemetry.metrics.enabled
            && self
                .telemetry
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty, colored logs at debug level.
    ///
    /// # Example
    ///
    /// ```
    /// use pylon_config::PylonConfig;
    ///
    /// let config = PylonConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON logs at info level with the metrics exporter enabled.
    ///
    /// # Example
    ///
    /// ```
    /// use pylon_config::PylonConfig;
    ///
    /// let config = PylonConfig::production();
    /// assert_eq!(config.telemetry.logging.format, pylon_config::LogFormat::Json);
    /// assert!(config.telemetry.metrics.enabled);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;
        config.telemetry.metrics.enabled = true;
        config
    }
}

/// Builder for [`PylonConfig`].
#[derive(Debug, Default)]
pub struct PylonConfigBuilder {
    engine: Option<EngineConfig>,
    telemetry: Option<TelemetryConfig>,
}

impl PylonConfigBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine section.
    #[must_use]
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the telemetry section.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration, filling unset sections with defaults.
    #[must_use]
    pub fn build(self) -> PylonConfig {
        PylonConfig {
            engine: self.engine.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PylonConfig::default().validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(PylonConfig::development().validate().is_ok());
        assert!(PylonConfig::production().validate().is_ok());
    }

    #[test]
    fn test_zero_include_depth_rejected() {
        let mut config = PylonConfig::default();
        config.engine.max_include_depth = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("engine.max_include_depth"));
    }

    #[test]
    fn test_zero_call_depth_rejected() {
        let mut config = PylonConfig::default();
        config.engine.max_call_depth = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("engine.max_call_depth"));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut config = PylonConfig::default();
        config.telemetry.logging.level = "verbose".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("verbose"));
    }

    #[test]
    fn test_log_level_case_insensitive() {
        let mut config = PylonConfig::default();
        config.telemetry.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_metrics_addr_checked_only_when_enabled() {
        let mut config = PylonConfig::default();
        config.telemetry.metrics.addr = "not-an-address".to_string();
        assert!(config.validate().is_ok());

        config.telemetry.metrics.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("telemetry.metrics.addr"));
    }

    #[test]
    fn test_builder_defaults_missing_sections() {
        let config = PylonConfig::builder().build();
        assert_eq!(config, PylonConfig::default());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result: Result<PylonConfig, _> = toml::from_str("[server]\nport = 1\n");
        assert!(result.is_err());
    }
}
