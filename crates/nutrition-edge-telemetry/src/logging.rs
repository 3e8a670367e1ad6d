//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and either a
//! JSON or a human-readable formatter. All pipeline stages log through the
//! `tracing` macros using the field names in [`fields`].
//!
//! # Example
//!
//! ```rust,ignore
//! use nutrition_edge_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(request_id = "abc", path = "/api/v1/meals", "Request completed");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "nutrition_edge=debug,hyper=warn").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include span events (enter, exit, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Human-readable output at debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            include_target: true,
        }
    }

    /// JSON output at info level.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }
}

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    Ok(())
}

/// Creates an env filter from a directive string.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Standard log field names.
pub mod fields {
    /// Request ID field name.
    pub const REQUEST_ID: &str = "request_id";
    /// HTTP method field name.
    pub const METHOD: &str = "method";
    /// Request path field name.
    pub const PATH: &str = "path";
    /// Raw query string field name.
    pub const QUERY: &str = "query";
    /// User agent field name.
    pub const USER_AGENT: &str = "user_agent";
    /// Remote IP field name.
    pub const REMOTE_ADDR: &str = "remote_addr";
    /// Host header field name.
    pub const HOST: &str = "host";
    /// Response status field name.
    pub const STATUS_CODE: &str = "status_code";
    /// Duration field name (in milliseconds).
    pub const DURATION_MS: &str = "duration_ms";
    /// Response content type field name.
    pub const CONTENT_TYPE: &str = "content_type";
    /// Response size field name.
    pub const CONTENT_LENGTH: &str = "content_length";
    /// User ID field name.
    pub const USER_ID: &str = "user_id";
    /// Error message field name.
    pub const ERROR: &str = "error";
    /// Coarse error class field name.
    pub const ERROR_TYPE: &str = "error_type";
}

/// Logs a request that exceeded the slow-request threshold.
#[macro_export]
macro_rules! log_slow_request {
    ($method:expr, $path:expr, $status:expr, $duration_ms:expr, $threshold_ms:expr, $remote:expr) => {
        tracing::warn!(
            method = %$method,
            path = %$path,
            status_code = $status,
            duration_ms = $duration_ms,
            slow_threshold_ms = $threshold_ms,
            remote_addr = %$remote,
            "Slow request detected"
        );
    };
}

/// Logs a security event at warn level.
#[macro_export]
macro_rules! log_security_event {
    ($event:expr) => {
        tracing::warn!(
            alert_type = %$event.event_type,
            severity = %$event.severity,
            request_id = $event.request_id.as_deref().unwrap_or(""),
            method = $event.method.as_deref().unwrap_or(""),
            path = $event.path.as_deref().unwrap_or(""),
            remote_addr = $event.ip_address.as_deref().unwrap_or(""),
            user_agent = $event.user_agent.as_deref().unwrap_or(""),
            details = ?$event.details,
            "{}",
            $event.message
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert!(config.json_format);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert!(!config.json_format);
        assert!(config.span_events);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_production_config() {
        let config = LogConfig::production();
        assert!(config.json_format);
        assert!(!config.file_line_info);
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("nutrition_edge=debug,hyper=warn").is_ok());
    }

    #[test]
    fn test_disabled_logging() {
        let config = LogConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LogConfig = serde_json::from_str(r#"{"level":"warn"}"#).unwrap();
        assert_eq!(config.level, "warn");
        assert!(config.json_format);
    }
}
