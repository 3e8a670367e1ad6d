//! Prometheus metrics for the edge pipeline.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `edge_requests_total` | Counter | `method`, `status` | Completed requests |
//! | `edge_request_duration_seconds` | Histogram | `method` | Request latency |
//! | `edge_rate_limited_total` | Counter | - | Requests rejected with 429 |
//! | `edge_rate_limit_store_errors_total` | Counter | - | Fail-open store errors |
//! | `edge_cache_hits_total` | Counter | - | Response cache hits |
//! | `edge_cache_misses_total` | Counter | - | Response cache misses |
//! | `edge_security_events_total` | Counter | `type`, `severity` | Security events |
//! | `edge_panics_total` | Counter | - | Recovered panics |
//!
//! The recording functions are no-ops until a recorder is installed, so stages
//! call them unconditionally.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address of the Prometheus scrape listener (e.g., "0.0.0.0:9090").
    ///
    /// When absent the recorder is installed without a listener and metrics
    /// are available through [`render_metrics`].
    pub addr: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: None,
        }
    }
}

/// Installs the Prometheus recorder.
///
/// With a listener address this must run inside a tokio runtime, since the
/// exporter spawns its HTTP server there.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` when a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();

    match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            builder
                .with_http_listener(addr)
                .install()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }
        None => {
            let handle = builder
                .install_recorder()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let _ = METRICS_HANDLE.set(handle);
        }
    }

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if no listener-less recorder was installed.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!("edge_requests_total", "Total number of HTTP requests processed");
    describe_histogram!(
        "edge_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!("edge_rate_limited_total", "Requests rejected by the rate limiter");
    describe_counter!(
        "edge_rate_limit_store_errors_total",
        "Rate-limit store failures answered by failing open"
    );
    describe_counter!("edge_cache_hits_total", "Response cache hits");
    describe_counter!("edge_cache_misses_total", "Response cache misses");
    describe_counter!(
        "edge_security_events_total",
        "Security events by type and severity"
    );
    describe_counter!("edge_panics_total", "Panics recovered by the pipeline");
}

/// Records a completed request.
pub fn record_request(method: &str, status_code: u16, duration: Duration) {
    counter!(
        "edge_requests_total",
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "edge_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records a request rejected by the rate limiter.
pub fn record_rate_limited() {
    counter!("edge_rate_limited_total").increment(1);
}

/// Records a rate-limit store failure.
pub fn record_rate_limit_store_error() {
    counter!("edge_rate_limit_store_errors_total").increment(1);
}

/// Records a response cache lookup outcome.
pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!("edge_cache_hits_total").increment(1);
    } else {
        counter!("edge_cache_misses_total").increment(1);
    }
}

/// Records a security event.
pub fn record_security_event(event_type: &str, severity: &str) {
    counter!(
        "edge_security_events_total",
        "type" => event_type.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

/// Records a recovered panic.
pub fn record_panic() {
    counter!("edge_panics_total").increment(1);
}
