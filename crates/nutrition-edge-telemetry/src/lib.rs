//! Observability for the nutrition edge pipeline.
//!
//! - **Logging**: structured `tracing` output, JSON in production
//! - **Metrics**: Prometheus-format counters via the `metrics` crate
//! - **Audit**: a bounded ring of [`SecurityEvent`]s with running counters
//!
//! # Example
//!
//! ```rust,ignore
//! use nutrition_edge_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = init_telemetry(&TelemetryConfig::production()).expect("telemetry");
//!     // hand `sink` to the pipeline builder
//! }
//! ```
//!
//! [`SecurityEvent`]: nutrition_edge_core::SecurityEvent

#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use audit::{SecurityAuditLog, SecurityMetrics, SecurityMetricsSnapshot, SecuritySink};
pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging and metrics and returns the shared security sink.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<SecuritySink> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        "Telemetry initialized"
    );

    Ok(SecuritySink::new(config.audit_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_everything_disabled() {
        let config = TelemetryConfig {
            logging: LogConfig {
                enabled: false,
                ..LogConfig::default()
            },
            audit_capacity: 5,
            ..TelemetryConfig::default()
        };
        let sink = init_telemetry(&config).unwrap();
        assert_eq!(sink.audit_log().capacity(), 5);
    }
}
