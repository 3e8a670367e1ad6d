//! CORS (Cross-Origin Resource Sharing) middleware.
//!
//! Answers preflight `OPTIONS` requests itself with 204 and adds the
//! `Access-Control-*` headers to ordinary cross-origin responses. Preflights
//! from a disallowed origin, or asking for a disallowed method or header, are
//! rejected with 403 `forbidden`.
//!
//! Defaults: any origin, `GET, POST, PUT, DELETE, OPTIONS`, any header, no
//! credentials, preflight cache of 24 hours.
//!
//! ## Example
//!
//! ```
//! use nutrition_edge_middleware::stages::CorsMiddleware;
//! use http::Method;
//! use std::time::Duration;
//!
//! let cors = CorsMiddleware::builder()
//!     .allow_origin("https://app.nutrition.example")
//!     .allow_methods([Method::GET, Method::POST])
//!     .allow_headers(["Content-Type", "Authorization"])
//!     .max_age(Duration::from_secs(3600))
//!     .build();
//! # let _ = cors;
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use bytes::Bytes;
use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::Full;
use nutrition_edge_core::EdgeError;
use std::time::Duration;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Method` header (preflight).
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
}

/// Represents the set of allowed origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Allow any origin (wildcard `*`).
    Any,
    /// Allow specific origins.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Checks if an origin is allowed.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.iter().any(|o| o == origin),
        }
    }

    fn header_value(&self, origin: &str) -> Option<HeaderValue> {
        match self {
            Self::Any => Some(HeaderValue::from_static("*")),
            Self::List(_) if self.is_allowed(origin) => HeaderValue::from_str(origin).ok(),
            Self::List(_) => None,
        }
    }
}

/// Configuration for CORS middleware.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    allowed_origins: AllowedOrigins,
    allowed_methods: Vec<Method>,
    /// Lowercased; `*` allows any header.
    allowed_headers: Vec<String>,
    expose_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::Any,
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allowed_headers: vec!["*".to_string()],
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age: Some(Duration::from_secs(86400)),
        }
    }
}

impl CorsConfig {
    fn allows_header(&self, header: &str) -> bool {
        self.allowed_headers
            .iter()
            .any(|h| h == "*" || h.as_str() == header)
    }
}

/// Builder for CORS configuration.
#[derive(Debug, Clone, Default)]
pub struct CorsBuilder {
    config: CorsConfig,
}

impl CorsBuilder {
    /// Creates a new CORS builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows any origin (wildcard `*`).
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.config.allowed_origins = AllowedOrigins::Any;
        self
    }

    /// Adds an allowed origin, switching away from the wildcard.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        if let AllowedOrigins::List(origins) = &mut self.config.allowed_origins {
            origins.push(origin.into());
        } else {
            self.config.allowed_origins = AllowedOrigins::List(vec![origin.into()]);
        }
        self
    }

    /// Sets the allowed origins. A list containing `*` allows any origin.
    #[must_use]
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let origins: Vec<String> = origins.into_iter().map(Into::into).collect();
        self.config.allowed_origins = if origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        };
        self
    }

    /// Sets the allowed HTTP methods.
    #[must_use]
    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.config.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Sets the allowed request headers.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_headers = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Sets headers that should be exposed to JavaScript.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether to allow credentials.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.config.allow_credentials = allow;
        self
    }

    /// Sets the max age for preflight cache.
    #[must_use]
    pub fn max_age(mut self, duration: Duration) -> Self {
        self.config.max_age = Some(duration);
        self
    }

    /// Builds the CORS middleware.
    #[must_use]
    pub fn build(self) -> CorsMiddleware {
        if self.config.allow_credentials && self.config.allowed_origins == AllowedOrigins::Any {
            tracing::warn!("CORS credentials enabled with a wildcard origin; browsers will reject these responses");
        }
        CorsMiddleware {
            config: self.config,
        }
    }
}

/// CORS middleware that handles preflight requests and adds CORS headers.
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    /// Creates a CORS middleware with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new CORS builder.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    fn is_preflight(request: &Request) -> bool {
        request.method() == Method::OPTIONS
            && request.headers().contains_key(headers::ORIGIN)
            && request.headers().contains_key(headers::REQUEST_METHOD)
    }

    fn origin(request: &Request) -> Option<&str> {
        request
            .headers()
            .get(headers::ORIGIN)
            .and_then(|v| v.to_str().ok())
    }

    /// Checks a preflight; on failure returns the reason.
    fn check_preflight(&self, request: &Request) -> Result<String, String> {
        let origin = Self::origin(request).ok_or("Missing Origin header")?;
        if !self.config.allowed_origins.is_allowed(origin) {
            return Err(format!("Origin '{origin}' not allowed"));
        }

        let requested_method = request
            .headers()
            .get(headers::REQUEST_METHOD)
            .and_then(|v| v.to_str().ok())
            .and_then(|m| m.parse::<Method>().ok());
        if let Some(method) = requested_method {
            if !self.config.allowed_methods.contains(&method) {
                return Err(format!("Method '{method}' not allowed"));
            }
        }

        if let Some(requested) = request
            .headers()
            .get(headers::REQUEST_HEADERS)
            .and_then(|v| v.to_str().ok())
        {
            for name in requested.split(',').map(|h| h.trim().to_ascii_lowercase()) {
                if !name.is_empty() && !self.config.allows_header(&name) {
                    return Err(format!("Header '{name}' not allowed"));
                }
            }
        }

        Ok(origin.to_string())
    }

    fn preflight_response(&self, origin: &str) -> Response {
        let mut builder = http::Response::builder().status(StatusCode::NO_CONTENT);

        if let Some(value) = self.config.allowed_origins.header_value(origin) {
            builder = builder.header(headers::ALLOW_ORIGIN, value);
        }

        let methods: Vec<_> = self.config.allowed_methods.iter().map(Method::as_str).collect();
        if !methods.is_empty() {
            builder = builder.header(headers::ALLOW_METHODS, methods.join(", "));
        }

        if !self.config.allowed_headers.is_empty() {
            builder = builder.header(headers::ALLOW_HEADERS, self.config.allowed_headers.join(", "));
        }

        if self.config.allow_credentials {
            builder = builder.header(headers::ALLOW_CREDENTIALS, "true");
        }

        if let Some(max_age) = self.config.max_age {
            builder = builder.header(headers::MAX_AGE, max_age.as_secs().to_string());
        }

        builder = builder.header(
            header::VARY,
            "Origin, Access-Control-Request-Method, Access-Control-Request-Headers",
        );

        builder
            .body(Full::new(Bytes::new()))
            .expect("failed to build preflight response")
    }

    fn add_cors_headers(&self, response: &mut Response, origin: &str) {
        let headers = response.headers_mut();

        if let Some(value) = self.config.allowed_origins.header_value(origin) {
            headers.insert(headers::ALLOW_ORIGIN, value);
        }

        if self.config.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }

        if !self.config.expose_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.config.expose_headers.join(", ")) {
                headers.insert(headers::EXPOSE_HEADERS, value);
            }
        }

        if self.config.allowed_origins != AllowedOrigins::Any {
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if Self::is_preflight(&request) {
                return match self.check_preflight(&request) {
                    Ok(origin) => self.preflight_response(&origin),
                    Err(reason) => {
                        tracing::debug!(request_id = %ctx.request_id(), reason = %reason, "CORS preflight rejected");
                        ctx.fail(EdgeError::forbidden("CORS request not allowed").with_detail(reason))
                    }
                };
            }

            let origin = Self::origin(&request).map(String::from);
            let mut response = next.run(ctx, request).await;

            if let Some(origin) = origin {
                if self.config.allowed_origins.is_allowed(&origin) {
                    self.add_cors_headers(&mut response, &origin);
                }
            }

            response
        })
    }
}
