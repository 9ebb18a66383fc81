//! Typed configuration for Pylon.
//!
//! This crate provides a strongly-typed configuration system for the Pylon
//! request engine with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//! - File watching for hot reconfiguration
//!
//! # Overview
//!
//! [`PylonConfig`] holds two sections:
//!
//! - [`EngineConfig`] - nesting limits, static response headers, MIME table
//! - [`TelemetryConfig`] - logging and metrics settings
//!
//! [`EngineConfig::to_settings`] turns the engine section into the runtime
//! [`EngineSettings`](pylon_engine::EngineSettings) the request processor reads.
//!
//! # Example
//!
//! ```no_run
//! use pylon_config::ConfigLoader;
//!
//! # fn main() -> Result<(), pylon_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("pylon.toml")?
//!     .with_env_prefix("PYLON")
//!     .load()?;
//!
//! let settings = config.engine.to_settings();
//! println!("include limit: {}", settings.max_include_depth());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! max_include_depth = 50
//! max_call_depth = 1000
//! additional_response_headers = ["X-Frame-Options=SAMEORIGIN"]
//!
//! [engine.mime_types]
//! md = "text/markdown"
//!
//! [telemetry]
//! service_name = "pylon"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = false
//! addr = "0.0.0.0:9090"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with variables of the form
//! `PREFIX__SECTION__KEY`:
//!
//! - `PYLON__ENGINE__MAX_INCLUDE_DEPTH=20`
//! - `PYLON__ENGINE__ADDITIONAL_RESPONSE_HEADERS=X-A=1,X-B=2`
//! - `PYLON__TELEMETRY__METRICS__ENABLED=true`

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;
mod watcher;

pub use config::{PylonConfig, PylonConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{EngineConfig, LogFormat, LoggingConfig, MetricsConfig, TelemetryConfig};
pub use watcher::{ConfigWatcher, ConfigWatcherBuilder, FileChangeEvent, FileChangeKind};
