//! Prometheus metrics for Pylon.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `pylon_requests_total` | Counter | `status` | Completed requests |
//! | `pylon_request_duration_seconds` | Histogram | - | Time spent in the processor |
//! | `pylon_handler_calls_total` | Counter | - | Handler invocations, nested ones included |
//! | `pylon_error_chains_total` | Counter | - | Error chains that reached their filters |
//! | `pylon_handler_failures_total` | Counter | - | Requests whose handler failed |
//!
//! [`MetricsSink`] records these from each [`RequestSummary`]. Without an
//! installed recorder the `metrics` macros are no-ops, so the sink is always
//! safe to attach.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use pylon_engine::{RequestSummary, TelemetrySink};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Request counter.
pub const REQUESTS_TOTAL: &str = "pylon_requests_total";
/// Request duration histogram.
pub const REQUEST_DURATION_SECONDS: &str = "pylon_request_duration_seconds";
/// Handler invocation counter.
pub const HANDLER_CALLS_TOTAL: &str = "pylon_handler_calls_total";
/// Error chain counter.
pub const ERROR_CHAINS_TOTAL: &str = "pylon_error_chains_total";
/// Failed handler counter.
pub const HANDLER_FAILURES_TOTAL: &str = "pylon_handler_failures_total";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the exporter is installed.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and spawns its HTTP listener.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if the exporter cannot be built or a global
/// recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "metrics exporter stopped");
        }
    });

    register_metric_descriptions();
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Total number of requests processed");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "Time spent processing a request, in seconds"
    );
    describe_counter!(
        HANDLER_CALLS_TOTAL,
        "Total handler invocations, nested includes and forwards included"
    );
    describe_counter!(
        ERROR_CHAINS_TOTAL,
        "Total error chains that reached their filters"
    );
    describe_counter!(
        HANDLER_FAILURES_TOTAL,
        "Total requests in which a handler failed"
    );
}

/// Records request summaries as Prometheus metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSink;

impl MetricsSink {
    /// Creates the sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TelemetrySink for MetricsSink {
    fn record(&self, summary: &RequestSummary) {
        counter!(REQUESTS_TOTAL, "status" => summary.status.to_string()).increment(1);
        histogram!(REQUEST_DURATION_SECONDS).record(summary.duration.as_secs_f64());
        counter!(HANDLER_CALLS_TOTAL).increment(summary.handler_calls);
        if summary.error_chains > 0 {
            counter!(ERROR_CHAINS_TOTAL).increment(u64::from(summary.error_chains));
        }
        if summary.failed_handler.is_some() {
            counter!(HANDLER_FAILURES_TOTAL).increment(1);
        }

        tracing::debug!(
            request_id = %summary.request_id,
            method = %summary.method,
            path = %summary.path,
            status = summary.status,
            duration_ms = summary.duration.as_secs_f64() * 1000.0,
            handler_calls = summary.handler_calls,
            error_chains = summary.error_chains,
            "Request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_engine::RequestId;
    use std::time::Duration;

    fn summary(status: u16, error_chains: u32, failed: Option<&str>) -> RequestSummary {
        RequestSummary {
            request_id: RequestId::new(),
            method: "GET".to_string(),
            path: "/content/page.html".to_string(),
            status,
            duration: Duration::from_millis(12),
            handler_calls: 3,
            error_chains,
            failed_handler: failed.map(str::to_string),
            progress: Vec::new(),
        }
    }

    fn render_with_local_recorder(summaries: &[RequestSummary]) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            for summary in summaries {
                MetricsSink::new().record(summary);
            }
        });
        handle.render()
    }

    #[test]
    fn test_default_config_disabled() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.addr, "0.0.0.0:9090");
    }

    #[test]
    fn test_disabled_init_is_noop() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_address_rejected() {
        let config = MetricsConfig {
            enabled: true,
            addr: "nowhere".to_string(),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_sink_counts_requests_by_status() {
        let output = render_with_local_recorder(&[
            summary(200, 0, None),
            summary(200, 0, None),
            summary(404, 1, None),
        ]);

        assert!(output.contains(r#"pylon_requests_total{status="200"} 2"#));
        assert!(output.contains(r#"pylon_requests_total{status="404"} 1"#));
        assert!(output.contains("pylon_handler_calls_total 9"));
        assert!(output.contains("pylon_error_chains_total 1"));
        assert!(!output.contains(HANDLER_FAILURES_TOTAL));
    }

    #[test]
    fn test_sink_counts_failed_handlers() {
        let output = render_with_local_recorder(&[summary(500, 1, Some("page"))]);
        assert!(output.contains("pylon_handler_failures_total 1"));
    }

    #[test]
    fn test_sink_without_recorder_is_noop() {
        MetricsSink::new().record(&summary(200, 0, None));
    }
}
