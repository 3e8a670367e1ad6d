//! Request logging stages.
//!
//! - [`RequestLogger`] emits one structured record per request.
//! - [`SlowRequestLogger`] warns when a request exceeds a duration threshold.
//! - [`SecurityEventLogger`] warns on 401/403 outcomes, validator rejections
//!   and suspicious raw paths or queries.
//! - [`MetricsLogger`] logs running totals every `interval` requests.
//!
//! All four share the logging slot of the pipeline and run in the order they
//! were added.
//!
//! # Example
//!
//! ```
//! use nutrition_edge_middleware::stages::{RequestLogger, RequestLoggerConfig};
//!
//! let logger = RequestLogger::new(RequestLoggerConfig::production());
//! assert!(logger.config().should_skip("/favicon.ico"));
//! assert!(!logger.config().should_skip("/api/v1/meals"));
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{client_ip, collect_body, header_str, Request, Response};
use bytes::Bytes;
use http::header;
use http_body_util::Full;
use nutrition_edge_core::{SecurityEvent, Severity};
use nutrition_edge_telemetry::audit::event_types;
use nutrition_edge_telemetry::metrics::record_request;
use nutrition_edge_telemetry::SecuritySink;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Placeholder logged in place of a body larger than the cap.
pub const BODY_TOO_LARGE: &str = "[BODY TOO LARGE - TRUNCATED]";

/// Raw path or query fragments the security-event logger flags.
const SUSPICIOUS_FRAGMENTS: [&str; 5] = ["../", "<script", "union", "exec", "eval"];

/// Configuration for [`RequestLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLoggerConfig {
    /// Path prefixes that are never logged.
    pub skip_paths: Vec<String>,
    /// Skip `/health` and `/health/` exactly.
    pub skip_health: bool,
    /// Include the request body.
    pub log_request_body: bool,
    /// Include the response body.
    pub log_response_body: bool,
    /// Bodies longer than this are replaced by [`BODY_TOO_LARGE`].
    pub max_body_bytes: usize,
}

impl Default for RequestLoggerConfig {
    fn default() -> Self {
        Self {
            skip_paths: vec!["/health".to_string(), "/metrics".to_string()],
            skip_health: true,
            log_request_body: false,
            log_response_body: false,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl RequestLoggerConfig {
    /// Verbose logging with bodies and a small cap.
    #[must_use]
    pub fn development() -> Self {
        Self {
            skip_paths: vec!["/health".to_string()],
            skip_health: false,
            log_request_body: true,
            log_response_body: true,
            max_body_bytes: 1024,
        }
    }

    /// No bodies; skips health, metrics and favicon.
    #[must_use]
    pub fn production() -> Self {
        Self {
            skip_paths: vec![
                "/health".to_string(),
                "/metrics".to_string(),
                "/favicon.ico".to_string(),
            ],
            skip_health: true,
            log_request_body: false,
            log_response_body: false,
            max_body_bytes: 512 * 1024,
        }
    }

    /// Returns `true` if requests to `path` are not logged.
    #[must_use]
    pub fn should_skip(&self, path: &str) -> bool {
        if self.skip_health && (path == "/health" || path == "/health/") {
            return true;
        }
        self.skip_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn render_body(&self, body: &[u8]) -> String {
        if body.len() > self.max_body_bytes {
            BODY_TOO_LARGE.to_string()
        } else {
            String::from_utf8_lossy(body).into_owned()
        }
    }
}

/// Coarse error class, inferred from the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Input or validation failures.
    Validation,
    /// Deadlines and cancellations.
    Timeout,
    /// Storage failures.
    Database,
    /// Connectivity failures.
    Network,
    /// Access failures.
    Permission,
    /// Anything else.
    Unknown,
}

impl ErrorClass {
    /// Classifies an error message by keyword.
    #[must_use]
    pub fn classify(text: &str) -> Self {
        let text = text.to_ascii_lowercase();
        if text.contains("validation") {
            Self::Validation
        } else if text.contains("timeout") {
            Self::Timeout
        } else if text.contains("database") {
            Self::Database
        } else if text.contains("network") {
            Self::Network
        } else if text.contains("permission") {
            Self::Permission
        } else {
            Self::Unknown
        }
    }

    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Database => "database",
            Self::Network => "network",
            Self::Permission => "permission",
            Self::Unknown => "unknown",
        }
    }
}

/// The structured record emitted for one request.
///
/// Also stored in the context as an extension once the request completes.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    /// Correlation id.
    pub request_id: String,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Raw query string.
    pub query: String,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Resolved client IP.
    pub remote_addr: String,
    /// `Host` header.
    pub host: String,
    /// Response status.
    pub status_code: u16,
    /// Time spent downstream.
    pub duration_ms: u64,
    /// Response body size in bytes.
    pub content_length: usize,
    /// Response `Content-Type`.
    pub content_type: String,
    /// Authenticated user, if any.
    pub user_id: Option<String>,
    /// Captured request body.
    pub request_body: Option<String>,
    /// Captured response body.
    pub response_body: Option<String>,
    /// Error text when a stage rejected the request or the response is a 5xx.
    pub error: Option<String>,
    /// Class of `error`.
    pub error_type: Option<ErrorClass>,
}

/// Returns the error text of a completed request, if it failed.
fn failure_text(ctx: &MiddlewareContext, response: &Response) -> Option<String> {
    if let Some(err) = ctx.error() {
        return Some(match err.detail() {
            Some(detail) => format!("{err} ({detail})"),
            None => err.to_string(),
        });
    }
    response
        .status()
        .is_server_error()
        .then(|| format!("handler returned {}", response.status()))
}

/// Emits one structured record per request.
#[derive(Debug, Clone, Default)]
pub struct RequestLogger {
    config: RequestLoggerConfig,
}

impl RequestLogger {
    /// Creates a logger with the given configuration.
    #[must_use]
    pub fn new(config: RequestLoggerConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RequestLoggerConfig {
        &self.config
    }
}

impl Middleware for RequestLogger {
    fn name(&self) -> &'static str {
        "request_logger"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if self.config.should_skip(request.uri().path()) {
                return next.run(ctx, request).await;
            }

            let method = request.method().to_string();
            let path = request.uri().path().to_string();
            let query = request.uri().query().unwrap_or_default().to_string();
            let user_agent = header_str(request.headers(), header::USER_AGENT)
                .unwrap_or_default()
                .to_string();
            let host = header_str(request.headers(), header::HOST)
                .map(ToString::to_string)
                .or_else(|| request.uri().host().map(ToString::to_string))
                .unwrap_or_default();
            let remote_addr = client_ip(&request).unwrap_or_default();

            let (request, request_body) = if self.config.log_request_body {
                let (parts, body) = request.into_parts();
                let bytes = collect_body(body).await;
                let rendered = (!bytes.is_empty()).then(|| self.config.render_body(&bytes));
                (Request::from_parts(parts, Full::new(bytes)), rendered)
            } else {
                (request, None)
            };

            let start = std::time::Instant::now();
            let response = next.run(ctx, request).await;
            let duration = start.elapsed();

            let (parts, body) = response.into_parts();
            let body: Bytes = collect_body(body).await;
            let content_length = body.len();
            let response_body = (self.config.log_response_body && !body.is_empty())
                .then(|| self.config.render_body(&body));
            let response = Response::from_parts(parts, Full::new(body));

            let error = failure_text(ctx, &response);
            let record = RequestRecord {
                request_id: ctx.request_id().to_string(),
                method,
                path,
                query,
                user_agent,
                remote_addr,
                host,
                status_code: response.status().as_u16(),
                duration_ms: duration.as_millis() as u64,
                content_length,
                content_type: header_str(response.headers(), header::CONTENT_TYPE)
                    .unwrap_or_default()
                    .to_string(),
                user_id: ctx.user_id().map(ToString::to_string),
                request_body,
                response_body,
                error_type: error.as_deref().map(ErrorClass::classify),
                error,
            };

            record_request(&record.method, record.status_code, duration);
            emit(&record);
            ctx.set_extension(record);

            response
        })
    }
}

fn emit(record: &RequestRecord) {
    let user_id = record.user_id.as_deref().unwrap_or_default();
    let request_body = record.request_body.as_deref().unwrap_or_default();
    let response_body = record.response_body.as_deref().unwrap_or_default();

    if let Some(error) = &record.error {
        tracing::error!(
            request_id = %record.request_id,
            method = %record.method,
            path = %record.path,
            query = %record.query,
            user_agent = %record.user_agent,
            remote_addr = %record.remote_addr,
            host = %record.host,
            status_code = record.status_code,
            duration_ms = record.duration_ms,
            content_type = %record.content_type,
            content_length = record.content_length,
            user_id,
            request_body,
            response_body,
            error = %error,
            error_type = record.error_type.map_or("unknown", |c| c.as_str()),
            "Request failed"
        );
    } else {
        tracing::info!(
            request_id = %record.request_id,
            method = %record.method,
            path = %record.path,
            query = %record.query,
            user_agent = %record.user_agent,
            remote_addr = %record.remote_addr,
            host = %record.host,
            status_code = record.status_code,
            duration_ms = record.duration_ms,
            content_type = %record.content_type,
            content_length = record.content_length,
            user_id,
            request_body,
            response_body,
            "Request completed"
        );
    }
}

/// Marker stored in the context when a request exceeded the slow threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowRequest {
    /// Observed duration.
    pub duration: Duration,
}

/// Warns about requests slower than a threshold.
#[derive(Debug, Clone)]
pub struct SlowRequestLogger {
    threshold: Duration,
}

impl SlowRequestLogger {
    /// Creates a slow-request logger.
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Returns the threshold.
    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Middleware for SlowRequestLogger {
    fn name(&self) -> &'static str {
        "slow_request_logger"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let method = request.method().clone();
            let path = request.uri().path().to_string();
            let remote = client_ip(&request).unwrap_or_default();

            let start = tokio::time::Instant::now();
            let response = next.run(ctx, request).await;
            let duration = start.elapsed();

            if duration > self.threshold {
                nutrition_edge_telemetry::log_slow_request!(
                    method,
                    path,
                    response.status().as_u16(),
                    duration.as_millis() as u64,
                    self.threshold.as_millis() as u64,
                    remote
                );
                ctx.set_extension(SlowRequest { duration });
            }
            response
        })
    }
}

/// Warns about auth failures, validator rejections and suspicious requests.
///
/// Suspicious raw paths and queries are also published to the security sink
/// as `suspicious_pattern` events. Auth and validator rejections are already
/// published by the stages that produce them, so they are only logged here.
#[derive(Debug, Clone)]
pub struct SecurityEventLogger {
    sink: SecuritySink,
}

impl SecurityEventLogger {
    /// Creates a security-event logger publishing into `sink`.
    #[must_use]
    pub fn new(sink: SecuritySink) -> Self {
        Self { sink }
    }

    /// Returns the fragments of `path` and `query` that look like an attack.
    #[must_use]
    pub fn suspicious_fragments(path: &str, query: &str) -> Vec<&'static str> {
        SUSPICIOUS_FRAGMENTS
            .iter()
            .copied()
            .filter(|fragment| path.contains(fragment) || query.contains(fragment))
            .collect()
    }
}

impl Middleware for SecurityEventLogger {
    fn name(&self) -> &'static str {
        "security_event_logger"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let method = request.method().to_string();
            let path = request.uri().path().to_string();
            let query = request.uri().query().unwrap_or_default().to_string();
            let remote = client_ip(&request);
            let user_agent =
                header_str(request.headers(), header::USER_AGENT).map(ToString::to_string);

            for fragment in Self::suspicious_fragments(&path, &query) {
                self.sink.publish(
                    SecurityEvent::new(
                        event_types::SUSPICIOUS_PATTERN,
                        Severity::Warning,
                        "Suspicious request pattern detected",
                    )
                    .with_request(&method, &path, remote.as_deref(), user_agent.as_deref())
                    .with_request_id(ctx.request_id().as_str())
                    .with_detail("pattern", fragment)
                    .with_detail("query", query.as_str()),
                );
            }

            let response = next.run(ctx, request).await;

            let alert_type = match response.status().as_u16() {
                401 => Some(event_types::AUTHENTICATION_FAILURE),
                403 => Some(event_types::AUTHORIZATION_FAILURE),
                _ => ctx
                    .error()
                    .filter(|e| e.kind() == nutrition_edge_core::ErrorKind::SecurityViolation)
                    .map(|_| event_types::SECURITY_CHECK_FAILED),
            };
            if let Some(alert_type) = alert_type {
                tracing::warn!(
                    alert_type,
                    request_id = %ctx.request_id(),
                    method = %method,
                    path = %path,
                    status_code = response.status().as_u16(),
                    remote_addr = remote.as_deref().unwrap_or_default(),
                    user_agent = user_agent.as_deref().unwrap_or_default(),
                    error = %ctx.error().map(ToString::to_string).unwrap_or_default(),
                    "Security-relevant request outcome"
                );
            }
            response
        })
    }
}

/// Running totals reported by [`MetricsLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// Requests seen.
    pub total_requests: u64,
    /// Requests that failed.
    pub total_errors: u64,
    /// Mean downstream duration.
    pub avg_duration_ms: f64,
    /// Percentage of failed requests.
    pub error_rate: f64,
}

/// Logs request totals every `interval` requests.
#[derive(Debug)]
pub struct MetricsLogger {
    interval: u64,
    requests: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
}

impl Default for MetricsLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MetricsLogger {
    /// Creates a metrics logger reporting every `interval` requests.
    #[must_use]
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
        }
    }

    /// Returns the current totals.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let total_requests = self.requests.load(Ordering::Relaxed);
        let total_errors = self.errors.load(Ordering::Relaxed);
        let total_micros = self.total_micros.load(Ordering::Relaxed);
        let (avg_duration_ms, error_rate) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                total_micros as f64 / total_requests as f64 / 1000.0,
                total_errors as f64 / total_requests as f64 * 100.0,
            )
        };
        MetricsSummary {
            total_requests,
            total_errors,
            avg_duration_ms,
            error_rate,
        }
    }
}

impl Middleware for MetricsLogger {
    fn name(&self) -> &'static str {
        "metrics_logger"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let start = std::time::Instant::now();
            let response = next.run(ctx, request).await;
            let micros = start.elapsed().as_micros() as u64;

            self.total_micros.fetch_add(micros, Ordering::Relaxed);
            if failure_text(ctx, &response).is_some() {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            let count = self.requests.fetch_add(1, Ordering::Relaxed) + 1;

            if count % self.interval == 0 {
                let summary = self.summary();
                tracing::info!(
                    total_requests = summary.total_requests,
                    total_errors = summary.total_errors,
                    avg_duration_ms = summary.avg_duration_ms,
                    error_rate = summary.error_rate,
                    "API metrics"
                );
            }
            response
        })
    }
}
