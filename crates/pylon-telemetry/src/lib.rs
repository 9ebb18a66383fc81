//! Observability for Pylon.
//!
//! - **Logging**: structured JSON or pretty logs via `tracing-subscriber`
//! - **Metrics**: Prometheus-format request metrics via the `metrics` crate
//!
//! [`MetricsSink`] implements the engine's
//! [`TelemetrySink`](pylon_engine::TelemetrySink) and is attached to the
//! request processor; [`init_metrics`] installs the exporter that serves
//! what the sink records.
//!
//! # Example
//!
//! ```rust,ignore
//! use pylon_telemetry::{init_logging, init_metrics, LogConfig, MetricsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pylon_telemetry::TelemetryError> {
//!     init_logging(&LogConfig::production())?;
//!     init_metrics(&MetricsConfig {
//!         enabled: true,
//!         addr: "0.0.0.0:9090".to_string(),
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! # Metrics Endpoint
//!
//! ```text
//! # TYPE pylon_requests_total counter
//! pylon_requests_total{status="200"} 1234
//! pylon_requests_total{status="404"} 56
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use self::metrics::{init_metrics, render_metrics, MetricsConfig, MetricsSink};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
