//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use std::collections::BTreeMap;

use pylon_engine::{
    EngineSettings, StaticResponseHeader, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_INCLUDE_DEPTH,
};
use serde::{Deserialize, Serialize};

/// Engine configuration section.
///
/// Controls nesting limits, the static headers added to every top-level
/// response, and extra extension to content type mappings.
///
/// # Example
///
/// ```
/// use pylon_config::EngineConfig;
///
/// let config = EngineConfig {
///     max_include_depth: 10,
///     additional_response_headers: vec!["X-Frame-Options=SAMEORIGIN".to_string()],
///     ..Default::default()
/// };
///
/// let settings = config.to_settings();
/// assert_eq!(settings.max_include_depth(), 10);
/// assert_eq!(settings.additional_response_headers().len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum include/forward nesting per request.
    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: usize,

    /// Maximum handler call nesting per request.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    /// Headers applied to every top-level response, as `name=value` entries.
    #[serde(default)]
    pub additional_response_headers: Vec<String>,

    /// Extension to content type mappings added to the built-in table.
    #[serde(default)]
    pub mime_types: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_include_depth: default_max_include_depth(),
            max_call_depth: default_max_call_depth(),
            additional_response_headers: Vec::new(),
            mime_types: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Converts this section into runtime engine settings.
    ///
    /// Malformed header entries are skipped and logged.
    #[must_use]
    pub fn to_settings(&self) -> EngineSettings {
        let headers = StaticResponseHeader::parse_all(&self.additional_response_headers);
        self.mime_types.iter().fold(
            EngineSettings::new()
                .with_max_include_depth(self.max_include_depth)
                .with_max_call_depth(self.max_call_depth)
                .with_additional_response_headers(headers),
            |settings, (extension, content_type)| {
                settings.with_mime_type(extension.as_str(), content_type.as_str())
            },
        )
    }
}

const fn default_max_include_depth() -> usize {
    DEFAULT_MAX_INCLUDE_DEPTH
}

const fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus metrics endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name attached to logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "pylon".to_string()
}
