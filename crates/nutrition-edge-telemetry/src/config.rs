//! Telemetry configuration.

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use serde::{Deserialize, Serialize};

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs.
    pub service_name: String,

    /// Environment (production, staging, development).
    pub environment: String,

    /// Logging configuration.
    pub logging: LogConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Number of security events retained in the audit ring.
    pub audit_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "nutrition-edge".to_string(),
            environment: "development".to_string(),
            logging: LogConfig::default(),
            metrics: MetricsConfig::default(),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl TelemetryConfig {
    /// Pretty debug logs, no metrics.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LogConfig::development(),
            ..Self::default()
        }
    }

    /// JSON logs and a Prometheus recorder.
    #[must_use]
    pub fn production() -> Self {
        Self {
            environment: "production".to_string(),
            logging: LogConfig::production(),
            metrics: MetricsConfig {
                enabled: true,
                addr: None,
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let dev = TelemetryConfig::development();
        assert!(!dev.logging.json_format);
        assert!(!dev.metrics.enabled);

        let prod = TelemetryConfig::production();
        assert_eq!(prod.environment, "production");
        assert!(prod.logging.json_format);
        assert!(prod.metrics.enabled);
        assert_eq!(prod.audit_capacity, DEFAULT_AUDIT_CAPACITY);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result: Result<TelemetryConfig, _> = serde_json::from_str(r#"{"tracing":{}}"#);
        assert!(result.is_err());
    }
}
