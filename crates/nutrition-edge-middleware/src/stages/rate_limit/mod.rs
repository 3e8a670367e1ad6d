//! Rate limiting middleware.
//!
//! Bounds the number of requests per identity in a fixed window. The window
//! starts at the first request and lasts `window`; at most `limit` requests
//! are admitted inside it.
//!
//! ## Identity
//!
//! By default the identity is, in order of preference:
//!
//! 1. `user:<id>` when the auth stage established a user,
//! 2. `apikey:<value>` when the API-key header is present,
//! 3. `ip:<client ip>`.
//!
//! The extractor can be replaced with [`RateLimitBuilder::identity`].
//!
//! ## Stores
//!
//! - [`MemoryStore`] keeps counters in process.
//! - [`RedisStore`] keeps them in Redis, shared across instances.
//!
//! A store failure never rejects a request: the limiter logs a warning and
//! forwards without rate-limit headers.
//!
//! ## Example
//!
//! ```
//! use nutrition_edge_middleware::stages::RateLimitMiddleware;
//! use std::time::Duration;
//!
//! let limiter = RateLimitMiddleware::builder()
//!     .limit(3)
//!     .window(Duration::from_secs(60))
//!     .skip(|req| req.uri().path() == "/health")
//!     .build();
//! assert_eq!(limiter.config().limit(), 3);
//! ```

mod memory;
mod remote;

pub use memory::{MemoryStore, SWEEP_INTERVAL};
pub use remote::{RedisStore, DEFAULT_STORE_TIMEOUT, KEY_PREFIX};

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{client_ip, header_str, headers, Request, Response};
use http::{header, HeaderValue};
use nutrition_edge_core::{EdgeError, SecurityEvent, Severity};
use nutrition_edge_telemetry::audit::event_types;
use nutrition_edge_telemetry::metrics::{record_rate_limit_store_error, record_rate_limited};
use nutrition_edge_telemetry::SecuritySink;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Requests counted in the current window, this one included.
    pub count: u64,
    /// The limit the request was counted against.
    pub limit: u64,
    /// When the current window ends.
    pub reset_at: SystemTime,
}

impl Decision {
    /// Requests left in the window: `max(0, limit - count)`.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }

    /// Window end in whole seconds since the epoch, rounded up.
    #[must_use]
    pub fn reset_epoch_secs(&self) -> u64 {
        let since = self.reset_at.duration_since(UNIX_EPOCH).unwrap_or_default();
        since.as_secs() + u64::from(since.subsec_nanos() > 0)
    }

    /// Seconds until the window ends, at least one.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_at
            .duration_since(SystemTime::now())
            .map_or(1, |d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
            .max(1)
    }
}

/// Failure of a rate-limit store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected the call or could not be reached.
    #[error("rate-limit store unavailable: {0}")]
    Backend(String),

    /// The call did not complete in time.
    #[error("rate-limit store timed out after {0:?}")]
    Timeout(Duration),
}

/// Counter storage for the rate limiter.
///
/// Implementations must be safe for concurrent callers of the same identity,
/// return `count = 1` with a fresh window on first access or after expiry,
/// and increment monotonically inside a live window.
pub trait RateLimitStore: Send + Sync + fmt::Debug + 'static {
    /// Counts one request for `identity`.
    fn allow<'a>(
        &'a self,
        identity: &'a str,
        limit: u64,
        window: Duration,
    ) -> BoxFuture<'a, Result<Decision, StoreError>>;

    /// Forgets the counter of `identity`.
    fn reset<'a>(&'a self, identity: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Short name used in logs.
    fn kind(&self) -> &'static str;
}

/// How the limiter derives the identity of a request.
#[derive(Clone, Default)]
pub enum IdentityExtractor {
    /// User, then API key, then client IP.
    #[default]
    Default,
    /// Authenticated user only; anonymous requests are not limited.
    User,
    /// API key header only; requests without it are not limited.
    ApiKey,
    /// Client IP only.
    Ip,
    /// Custom function.
    Custom(Arc<dyn Fn(&Request, &MiddlewareContext) -> Option<String> + Send + Sync>),
}

impl fmt::Debug for IdentityExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "IdentityExtractor::Default"),
            Self::User => write!(f, "IdentityExtractor::User"),
            Self::ApiKey => write!(f, "IdentityExtractor::ApiKey"),
            Self::Ip => write!(f, "IdentityExtractor::Ip"),
            Self::Custom(_) => write!(f, "IdentityExtractor::Custom(<fn>)"),
        }
    }
}

/// Configuration of one limiter.
#[derive(Clone)]
pub struct RateLimitConfig {
    limit: u64,
    window: Duration,
    group: Option<String>,
    path_prefixes: Vec<String>,
    api_key_header: String,
    identity: IdentityExtractor,
    skip_predicate: Option<Arc<dyn Fn(&Request) -> bool + Send + Sync>>,
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("group", &self.group)
            .field("path_prefixes", &self.path_prefixes)
            .field("api_key_header", &self.api_key_header)
            .field("identity", &self.identity)
            .field("has_skip_predicate", &self.skip_predicate.is_some())
            .finish()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::default_limits()
    }
}

impl RateLimitConfig {
    /// 100 requests per 15 minutes.
    #[must_use]
    pub fn default_limits() -> Self {
        Self::with_limits(100, Duration::from_secs(15 * 60))
    }

    /// 5 requests per 15 minutes, for authentication endpoints.
    #[must_use]
    pub fn strict() -> Self {
        Self::with_limits(5, Duration::from_secs(15 * 60))
    }

    /// 1000 requests per hour, for API clients.
    #[must_use]
    pub fn api() -> Self {
        Self::with_limits(1000, Duration::from_secs(60 * 60))
    }

    fn with_limits(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            group: None,
            path_prefixes: Vec::new(),
            api_key_header: headers::X_API_KEY.to_string(),
            identity: IdentityExtractor::Default,
            skip_predicate: None,
        }
    }

    /// Requests admitted per window.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Route group name, if any.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }
}

/// Rate limiting middleware.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    sink: SecuritySink,
}

impl RateLimitMiddleware {
    /// Creates a builder with the default limits and an in-memory store.
    #[must_use]
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    /// Creates a limiter with `config` and `store`.
    #[must_use]
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            config,
            store,
            sink: SecuritySink::default(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Forgets the counter of `identity` (e.g. `ip:10.0.0.1`).
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn reset(&self, identity: &str) -> Result<(), StoreError> {
        self.store.reset(&self.store_key(identity)).await
    }

    fn applies_to(&self, request: &Request) -> bool {
        let path = request.uri().path();
        let in_scope = self.config.path_prefixes.is_empty()
            || self
                .config
                .path_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()));
        let skipped = self
            .config
            .skip_predicate
            .as_ref()
            .is_some_and(|skip| skip(request));
        in_scope && !skipped
    }

    fn extract_identity(&self, request: &Request, ctx: &MiddlewareContext) -> Option<String> {
        let user = || ctx.user_id().map(|id| format!("user:{id}"));
        let api_key = || {
            header_str(request.headers(), self.config.api_key_header.as_str())
                .filter(|v| !v.is_empty())
                .map(|v| format!("apikey:{v}"))
        };
        let ip = || format!("ip:{}", client_ip(request).unwrap_or_else(|| "unknown".to_string()));

        match &self.config.identity {
            IdentityExtractor::Default => Some(user().or_else(api_key).unwrap_or_else(ip)),
            IdentityExtractor::User => user(),
            IdentityExtractor::ApiKey => api_key(),
            IdentityExtractor::Ip => Some(ip()),
            IdentityExtractor::Custom(f) => f(request, ctx),
        }
    }

    fn store_key(&self, identity: &str) -> String {
        match &self.config.group {
            Some(group) => format!("{group}/{identity}"),
            None => identity.to_string(),
        }
    }

    fn apply_headers(response: &mut Response, decision: &Decision) {
        let out = response.headers_mut();
        out.insert(headers::X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
        out.insert(headers::X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining()));
        out.insert(headers::X_RATELIMIT_RESET, HeaderValue::from(decision.reset_epoch_secs()));
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if !self.applies_to(&request) {
                return next.run(ctx, request).await;
            }
            let Some(identity) = self.extract_identity(&request, ctx) else {
                return next.run(ctx, request).await;
            };

            let key = self.store_key(&identity);
            let outcome = self
                .store
                .allow(&key, self.config.limit, self.config.window)
                .await;

            match outcome {
                Ok(decision) if decision.allowed => {
                    let mut response = next.run(ctx, request).await;
                    Self::apply_headers(&mut response, &decision);
                    response
                }
                Ok(decision) => {
                    record_rate_limited();
                    self.sink.publish(
                        SecurityEvent::new(
                            event_types::RATE_LIMIT_EXCEEDED,
                            Severity::Warning,
                            "Rate limit exceeded",
                        )
                        .with_request(
                            request.method().as_str(),
                            request.uri().path(),
                            client_ip(&request).as_deref(),
                            header_str(request.headers(), header::USER_AGENT),
                        )
                        .with_request_id(ctx.request_id().as_str())
                        .with_user_id(ctx.user_id())
                        .with_detail("identity", identity.as_str())
                        .with_detail("count", decision.count.to_string()),
                    );
                    let mut response = ctx.fail(
                        EdgeError::rate_limited()
                            .with_detail(format!("{key}: {} > {}", decision.count, decision.limit)),
                    );
                    Self::apply_headers(&mut response, &decision);
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
                    response
                }
                Err(error) => {
                    let unavailable = EdgeError::upstream_unavailable("Rate-limit store unavailable")
                        .with_detail(error.to_string());
                    record_rate_limit_store_error();
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        store = self.store.kind(),
                        error_kind = unavailable.kind().as_str(),
                        error = %error,
                        "Rate-limit store failed; admitting request"
                    );
                    next.run(ctx, request).await
                }
            }
        })
    }
}

/// Builder for [`RateLimitMiddleware`].
#[derive(Debug, Clone)]
pub struct RateLimitBuilder {
    config: RateLimitConfig,
    store: Option<Arc<dyn RateLimitStore>>,
    sink: SecuritySink,
}

impl Default for RateLimitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitBuilder {
    /// Creates a builder with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(RateLimitConfig::default_limits())
    }

    /// Creates a builder starting from `config`.
    #[must_use]
    pub fn from_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            store: None,
            sink: SecuritySink::default(),
        }
    }

    /// Sets the number of requests admitted per window.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.config.limit = limit;
        self
    }

    /// Sets the window length.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Names the route group. Counters of different groups are independent.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.config.group = Some(group.into());
        self
    }

    /// Limits only requests whose path starts with one of `prefixes`.
    #[must_use]
    pub fn paths(mut self, prefixes: impl IntoIterator<Item = String>) -> Self {
        self.config.path_prefixes = prefixes.into_iter().collect();
        self
    }

    /// Sets the header read for API-key identities.
    #[must_use]
    pub fn api_key_header(mut self, name: impl Into<String>) -> Self {
        self.config.api_key_header = name.into().to_ascii_lowercase();
        self
    }

    /// Selects the identity extractor.
    #[must_use]
    pub fn identity(mut self, identity: IdentityExtractor) -> Self {
        self.config.identity = identity;
        self
    }

    /// Bypasses the limiter for requests matching `f`.
    #[must_use]
    pub fn skip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.config.skip_predicate = Some(Arc::new(f));
        self
    }

    /// Uses `store` for counters.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publishes rejections into `sink`.
    #[must_use]
    pub fn sink(mut self, sink: SecuritySink) -> Self {
        self.sink = sink;
        self
    }

    /// Builds the middleware. Defaults to a [`MemoryStore`].
    #[must_use]
    pub fn build(self) -> RateLimitMiddleware {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn RateLimitStore>);
        RateLimitMiddleware {
            config: self.config,
            store,
            sink: self.sink,
        }
    }
}
