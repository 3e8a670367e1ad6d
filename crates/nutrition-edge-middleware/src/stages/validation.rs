//! Request validation.
//!
//! A coarse first-line sieve run before the rate limiter, the cache and the
//! handler. It is not a parser: business validation of bodies is the
//! handler's job.
//!
//! Checks run in a fixed order and the first violation wins:
//!
//! | # | Check | Error | Event |
//! |---|-------|-------|-------|
//! | 1 | content length <= `max_request_bytes` | 413 `payload_too_large` | `request_validation_failed`, warning |
//! | 2 | write methods send an allowed content type | 415 `invalid_format` | `request_validation_failed`, warning |
//! | 3 | user agent is not blocked | 403 `security_violation` | `request_validation_failed`, warning |
//! | 4 | client IP is not blocked | 403 `security_violation` | `request_validation_failed`, warning |
//! | 5 | path has no suspicious fragment | 422 `security_violation` | `security_check_failed`, high |
//! | 6 | query values have no SQL injection marker | 422 `security_violation` | `security_check_failed`, high |
//! | 7 | header values have no XSS marker | 422 `security_violation` | `security_check_failed`, high |
//!
//! Checks 5 to 7 only run when `enable_security_checks` is set. Every
//! comparison is substring matching after ASCII lowercasing.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{client_ip, collect_body, header_str, headers, Request, Response};
use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::Full;
use nutrition_edge_core::{EdgeError, SecurityEvent, Severity};
use nutrition_edge_telemetry::audit::event_types;
use nutrition_edge_telemetry::SecuritySink;

/// Default request size cap (10 MiB).
pub const DEFAULT_MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Validator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Largest accepted request body.
    pub max_request_bytes: u64,
    /// Content-type prefixes accepted on POST, PUT and PATCH.
    pub allowed_content_types: Vec<String>,
    /// Blocked user-agent substrings.
    pub blocked_user_agents: Vec<String>,
    /// Blocked client IPs, matched exactly.
    pub blocked_ips: Vec<String>,
    /// Suspicious path substrings.
    pub suspicious_paths: Vec<String>,
    /// SQL injection substrings checked in query values.
    pub sql_injection_patterns: Vec<String>,
    /// XSS substrings checked in header values.
    pub xss_patterns: Vec<String>,
    /// Run the pattern checks.
    pub enable_security_checks: bool,
    /// Stamp and check response headers.
    pub enable_response_validation: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            allowed_content_types: strings(&[
                "application/json",
                "multipart/form-data",
                "application/x-www-form-urlencoded",
            ]),
            blocked_user_agents: strings(&["bot", "crawler", "spider", "scanner"]),
            blocked_ips: Vec::new(),
            suspicious_paths: strings(&[
                "../",
                "..\\",
                "%2e%2e%2f",
                "%2e%2e%5c",
                "<script",
                "javascript:",
                "vbscript:",
                "onload=",
                "onerror=",
                "union select",
                "drop table",
                "insert into",
                "delete from",
                "exec(",
                "xp_",
                "sp_",
                "load_file",
                "into outfile",
            ]),
            sql_injection_patterns: strings(&[
                "' or '1'='1",
                "' or 1=1--",
                "union select",
                "drop table",
                "insert into",
                "delete from",
                "update set",
                "exec(",
                "xp_",
                "sp_",
                "load_file",
                "into outfile",
                "information_schema",
                "sysobjects",
                "syscolumns",
            ]),
            xss_patterns: strings(&[
                "<script",
                "javascript:",
                "vbscript:",
                "onload=",
                "onerror=",
                "onclick=",
                "<iframe",
                "<object",
                "<embed",
                "<link",
                "<meta",
                "data:text/html",
                "expression(",
            ]),
            enable_security_checks: true,
            enable_response_validation: true,
        }
    }
}

/// Which family of check a violation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Violation {
    Shape,
    Pattern,
}

impl Violation {
    const fn event(self) -> (&'static str, Severity) {
        match self {
            Self::Shape => (event_types::REQUEST_VALIDATION_FAILED, Severity::Warning),
            Self::Pattern => (event_types::SECURITY_CHECK_FAILED, Severity::High),
        }
    }
}

/// Returns the first pattern contained in `haystack`.
fn find_pattern<'p>(haystack: &str, patterns: &'p [String]) -> Option<&'p str> {
    patterns
        .iter()
        .map(String::as_str)
        .find(|pattern| haystack.contains(pattern))
}

/// Percent-decodes `input`, leaving malformed escapes as they are.
fn decode_lossy(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}

/// The request validation stage.
#[derive(Debug, Clone, Default)]
pub struct ValidationMiddleware {
    config: ValidationConfig,
    sink: SecuritySink,
}

impl ValidationMiddleware {
    /// Creates a validator with the given configuration.
    #[must_use]
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            sink: SecuritySink::default(),
        }
    }

    /// Publishes violations into `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: SecuritySink) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    fn check_shape(
        &self,
        request: &Request,
        body_len: usize,
        ip: Option<&str>,
    ) -> Result<(), EdgeError> {
        let declared = header_str(request.headers(), header::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<u64>().ok());
        let length = declared.unwrap_or(body_len as u64).max(body_len as u64);
        if length > self.config.max_request_bytes {
            return Err(EdgeError::payload_too_large("Request size exceeds maximum allowed")
                .with_detail(format!("{length} > {}", self.config.max_request_bytes)));
        }

        if matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
            let content_type = header_str(request.headers(), header::CONTENT_TYPE);
            let bodyless = content_type.is_none() && body_len == 0 && declared.unwrap_or(0) == 0;
            let allowed = content_type.is_some_and(|ct| {
                let ct = ct.to_ascii_lowercase();
                self.config
                    .allowed_content_types
                    .iter()
                    .any(|prefix| ct.starts_with(prefix.as_str()))
            });
            if !bodyless && !allowed {
                return Err(EdgeError::invalid_format("Content-Type not allowed")
                    .with_detail(content_type.unwrap_or("<missing>").to_string()));
            }
        }

        let user_agent = header_str(request.headers(), header::USER_AGENT)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if let Some(pattern) = find_pattern(&user_agent, &self.config.blocked_user_agents) {
            return Err(EdgeError::security_violation("Blocked user agent detected")
                .with_status(StatusCode::FORBIDDEN)
                .with_detail(pattern.to_string()));
        }

        if let Some(ip) = ip {
            if self.config.blocked_ips.iter().any(|blocked| blocked == ip) {
                return Err(EdgeError::security_violation("IP address is blocked")
                    .with_status(StatusCode::FORBIDDEN)
                    .with_detail(ip.to_string()));
            }
        }

        Ok(())
    }

    fn check_patterns(&self, request: &Request) -> Result<Vec<(String, String)>, EdgeError> {
        let raw_path = request.uri().path().to_ascii_lowercase();
        let decoded_path = decode_lossy(&raw_path).to_ascii_lowercase();
        let path_hit = find_pattern(&raw_path, &self.config.suspicious_paths)
            .or_else(|| find_pattern(&decoded_path, &self.config.suspicious_paths));
        if let Some(pattern) = path_hit {
            return Err(EdgeError::security_violation("Suspicious URL pattern detected")
                .with_detail(pattern.to_string()));
        }

        let query = request.uri().query().unwrap_or_default();
        let params: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .unwrap_or_else(|_| vec![("query".to_string(), decode_lossy(query))]);
        for (key, value) in &params {
            let value = value.to_ascii_lowercase();
            if let Some(pattern) = find_pattern(&value, &self.config.sql_injection_patterns) {
                return Err(EdgeError::security_violation(format!(
                    "Potential SQL injection in parameter {key}"
                ))
                .with_detail(pattern.to_string()));
            }
        }

        for (name, value) in request.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).to_ascii_lowercase();
            if let Some(pattern) = find_pattern(&value, &self.config.xss_patterns) {
                return Err(EdgeError::security_violation(format!(
                    "Potential XSS in header {name}"
                ))
                .with_detail(pattern.to_string()));
            }
        }

        Ok(params)
    }

    fn publish(
        &self,
        ctx: &MiddlewareContext,
        request: &Request,
        ip: Option<&str>,
        violation: Violation,
        error: &EdgeError,
    ) {
        let (event_type, severity) = violation.event();
        let mut event = SecurityEvent::new(event_type, severity, error.message())
            .with_request(
                request.method().as_str(),
                request.uri().path(),
                ip,
                header_str(request.headers(), header::USER_AGENT),
            )
            .with_request_id(ctx.request_id().as_str())
            .with_user_id(ctx.user_id());
        if let Some(detail) = error.detail() {
            event = event.with_detail("matched", detail);
        }
        self.sink.publish(event);
    }

    fn validate_response(&self, ctx: &MiddlewareContext, response: &mut Response) {
        let out = response.headers_mut();
        out.entry(header::X_CONTENT_TYPE_OPTIONS)
            .or_insert(HeaderValue::from_static("nosniff"));
        out.insert(
            headers::X_VALIDATION_STATUS,
            HeaderValue::from_static("validated"),
        );
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        if let Ok(value) = HeaderValue::from_str(&timestamp) {
            out.insert(headers::X_VALIDATION_TIMESTAMP, value);
        }

        if !response.status().is_success() {
            return;
        }
        let required = [header::CONTENT_TYPE, header::X_CONTENT_TYPE_OPTIONS];
        let missing: Vec<&str> = required
            .iter()
            .filter(|name| !response.headers().contains_key(*name))
            .map(http::HeaderName::as_str)
            .collect();
        for name in missing {
            self.sink.publish(
                SecurityEvent::new(
                    event_types::RESPONSE_VALIDATION_FAILED,
                    Severity::Warning,
                    format!("Missing required response header: {name}"),
                )
                .with_request_id(ctx.request_id().as_str()),
            );
        }
    }
}

impl Middleware for ValidationMiddleware {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let body = collect_body(body).await;
            let body_len = body.len();
            let request = Request::from_parts(parts, Full::new(body));
            let ip = client_ip(&request);

            if let Err(error) = self.check_shape(&request, body_len, ip.as_deref()) {
                self.publish(ctx, &request, ip.as_deref(), Violation::Shape, &error);
                return ctx.fail(error);
            }

            if self.config.enable_security_checks {
                match self.check_patterns(&request) {
                    Ok(params) => {
                        let query: serde_json::Map<String, serde_json::Value> = params
                            .into_iter()
                            .map(|(k, v)| (k, serde_json::Value::String(v)))
                            .collect();
                        ctx.set_validated("query", serde_json::Value::Object(query));
                    }
                    Err(error) => {
                        self.publish(ctx, &request, ip.as_deref(), Violation::Pattern, &error);
                        return ctx.fail(error);
                    }
                }
            }

            let mut response = next.run(ctx, request).await;
            if self.config.enable_response_validation {
                self.validate_response(ctx, &mut response);
            }
            response
        })
    }
}
