//! Response cache middleware.
//!
//! Serves stored 2xx responses for safe requests and stores cacheable
//! responses on a miss.
//!
//! A request bypasses the cache when its method is `POST`, `PUT`, `DELETE`,
//! `PATCH` or one of the configured skip methods, when its path starts with
//! a skip prefix, or when it sends `Cache-Control: no-cache`. A response is
//! stored only if its status is 2xx, it does not declare `no-store`, and its
//! body fits in `max_entry_bytes`.
//!
//! The TTL of an entry is the response's `max-age` when present, otherwise
//! the configured default.
//!
//! Hits carry `X-Cache: HIT` and `X-Cache-Expires`; misses carry
//! `X-Cache: MISS`. A hit answers `If-None-Match` and `If-Modified-Since`
//! with a bodiless 304.

mod key;
mod store;

pub use key::{fingerprint, CacheKeyer};
pub use store::{CacheStats, CachedResponse, ResponseStore};

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{collect_body, header_str, headers, Request, Response};
use bytes::Bytes;
use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::Full;
use nutrition_edge_telemetry::metrics::record_cache_lookup;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default TTL of an entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default cap on a stored body.
pub const DEFAULT_MAX_ENTRY_BYTES: usize = 1024 * 1024;

/// Default cap on a stored static body.
pub const STATIC_MAX_ENTRY_BYTES: usize = 512 * 1024;

const UNSAFE_METHODS: [Method; 4] = [Method::POST, Method::PUT, Method::DELETE, Method::PATCH];

/// Configuration of the response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used when the response has no `max-age`.
    pub default_ttl: Duration,
    /// Capacity of the store.
    pub max_entries: usize,
    /// Largest body that is stored.
    pub max_entry_bytes: usize,
    /// Methods that bypass the cache in addition to the unsafe ones.
    pub skip_methods: Vec<Method>,
    /// Path prefixes that bypass the cache.
    pub skip_prefixes: Vec<String>,
    /// When non-empty, only paths under these prefixes are cached.
    pub only_prefixes: Vec<String>,
    /// Request headers that partition the key.
    pub vary_headers: Vec<String>,
    /// Key derivation.
    pub keyer: CacheKeyer,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            max_entries: 1000,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            skip_methods: Vec::new(),
            skip_prefixes: Vec::new(),
            only_prefixes: Vec::new(),
            vary_headers: Vec::new(),
            keyer: CacheKeyer::Fingerprint,
        }
    }
}

impl CacheConfig {
    /// Preset for API responses: per-caller keys, auth and ops paths excluded.
    #[must_use]
    pub fn api() -> Self {
        Self {
            max_entries: 500,
            skip_prefixes: vec![
                "/health".to_string(),
                "/metrics".to_string(),
                "/api/v1/auth".to_string(),
            ],
            vary_headers: vec!["Authorization".to_string()],
            ..Self::default()
        }
    }

    /// Preset for a static subtree: GET only, keyed by path.
    #[must_use]
    pub fn static_files(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            default_ttl: ttl,
            max_entry_bytes: STATIC_MAX_ENTRY_BYTES,
            skip_methods: vec![Method::HEAD, Method::OPTIONS, Method::TRACE, Method::CONNECT],
            only_prefixes: vec![prefix.into()],
            keyer: CacheKeyer::Path,
            ..Self::default()
        }
    }
}

/// Response cache middleware.
///
/// # Example
///
/// ```
/// use nutrition_edge_middleware::stages::{CacheConfig, CacheMiddleware};
///
/// let cache = CacheMiddleware::new(CacheConfig::api());
/// assert_eq!(cache.stats().max_entries, 500);
/// ```
#[derive(Debug, Clone)]
pub struct CacheMiddleware {
    config: CacheConfig,
    store: Arc<ResponseStore>,
}

impl Default for CacheMiddleware {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheMiddleware {
    /// Creates a cache with its own store.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let store = Arc::new(ResponseStore::new(config.max_entries));
        Self { config, store }
    }

    /// Creates a static-file cache for `prefix`.
    #[must_use]
    pub fn static_files(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self::new(CacheConfig::static_files(prefix, ttl))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<ResponseStore> {
        &self.store
    }

    /// Drops every stored response.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    fn bypasses(&self, request: &Request) -> bool {
        let method = request.method();
        if UNSAFE_METHODS.contains(method) || self.config.skip_methods.contains(method) {
            return true;
        }

        let path = request.uri().path();
        if self
            .config
            .skip_prefixes
            .iter()
            .any(|p| path.starts_with(p.as_str()))
        {
            return true;
        }
        if !self.config.only_prefixes.is_empty()
            && !self
                .config
                .only_prefixes
                .iter()
                .any(|p| path.starts_with(p.as_str()))
        {
            return true;
        }

        header_str(request.headers(), header::CACHE_CONTROL)
            .is_some_and(|cc| has_directive(cc, "no-cache"))
    }

    fn ttl_for(&self, response_headers: &http::HeaderMap) -> Duration {
        header_str(response_headers, header::CACHE_CONTROL)
            .and_then(max_age)
            .unwrap_or(self.config.default_ttl)
    }
}

impl Middleware for CacheMiddleware {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if self.bypasses(&request) {
                return next.run(ctx, request).await;
            }

            let key = self.config.keyer.key(&request, &self.config.vary_headers);
            if let Some(entry) = self.store.lookup(&key) {
                record_cache_lookup(true);
                tracing::debug!(request_id = %ctx.request_id(), key = %key, "Cache hit");
                return serve(&entry, &request);
            }
            record_cache_lookup(false);

            let response = next.run(ctx, request).await;
            let (mut parts, body) = response.into_parts();
            let body = collect_body(body).await;

            let no_store = header_str(&parts.headers, header::CACHE_CONTROL)
                .is_some_and(|cc| has_directive(cc, "no-store"));
            if parts.status.is_success() && !no_store && body.len() <= self.config.max_entry_bytes {
                let ttl = self.ttl_for(&parts.headers);
                if !ttl.is_zero() {
                    self.store.store(
                        key,
                        CachedResponse::new(parts.status, parts.headers.clone(), body.clone(), ttl),
                    );
                }
            }

            parts
                .headers
                .insert(headers::X_CACHE, HeaderValue::from_static("MISS"));
            Response::from_parts(parts, Full::new(body))
        })
    }
}

/// Builds the response for a hit.
fn serve(entry: &CachedResponse, request: &Request) -> Response {
    let mut out = entry.headers.clone();
    out.insert(headers::X_CACHE, HeaderValue::from_static("HIT"));
    if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(entry.expires_at)) {
        out.insert(headers::X_CACHE_EXPIRES, value);
    }
    if !out.contains_key(header::LAST_MODIFIED) {
        if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(entry.last_modified)) {
            out.insert(header::LAST_MODIFIED, value);
        }
    }

    let (status, body) = if is_not_modified(entry, request) {
        out.remove(header::CONTENT_LENGTH);
        (StatusCode::NOT_MODIFIED, Bytes::new())
    } else {
        (entry.status, entry.body.clone())
    };

    let mut response = http::Response::builder()
        .status(status)
        .body(Full::new(body))
        .expect("failed to build cached response");
    *response.headers_mut() = out;
    response
}

fn is_not_modified(entry: &CachedResponse, request: &Request) -> bool {
    if let Some(if_none_match) = header_str(request.headers(), header::IF_NONE_MATCH) {
        return entry.etag.as_deref().is_some_and(|etag| {
            if_none_match
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == etag || candidate == "*")
        });
    }

    header_str(request.headers(), header::IF_MODIFIED_SINCE)
        .and_then(|v| httpdate::parse_http_date(v).ok())
        .is_some_and(|since| epoch_secs(entry.last_modified) <= epoch_secs(since))
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn has_directive(cache_control: &str, directive: &str) -> bool {
    cache_control
        .split(',')
        .map(str::trim)
        .any(|d| d.eq_ignore_ascii_case(directive))
}

fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').map(str::trim).find_map(|d| {
        let (name, value) = d.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok().map(Duration::from_secs)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request as HttpRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn get(uri: &str) -> Request {
        HttpRequest::builder()
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn counting<'a>(calls: Arc<AtomicUsize>, response: fn() -> Response) -> Next<'a> {
        Next::handler(move |_ctx, _req| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { response() })
        })
    }

    fn ok_with_etag() -> Response {
        http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ETAG, "\"abc\"")
            .body(Full::new(Bytes::from(r#"{"ok":true}"#)))
            .unwrap()
    }

    fn no_store() -> Response {
        http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CACHE_CONTROL, "no-store")
            .body(Full::new(Bytes::from("secret")))
            .unwrap()
    }

    fn not_found() -> Response {
        http::Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn short_lived() -> Response {
        http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CACHE_CONTROL, "public, max-age=1")
            .body(Full::new(Bytes::from("tick")))
            .unwrap()
    }

    fn large() -> Response {
        http::Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from(vec![b'x'; 2048])))
            .unwrap()
    }

    async fn send(cache: &CacheMiddleware, request: Request, next: Next<'_>) -> (Response, Bytes) {
        let mut ctx = MiddlewareContext::new();
        let response = cache.process(&mut ctx, request, next).await;
        let (parts, body) = response.into_parts();
        let body = collect_body(body).await;
        (Response::from_parts(parts, Full::new(Bytes::new())), body)
    }

    #[tokio::test]
    async fn test_miss_then_hit_then_not_modified() {
        let cache = CacheMiddleware::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let (first, body) = send(&cache, get("/api/v1/diseases"), counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(first.headers()[headers::X_CACHE], "MISS");
        assert_eq!(body, Bytes::from(r#"{"ok":true}"#));

        let (second, hit_body) = send(&cache, get("/api/v1/diseases"), counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()[headers::X_CACHE], "HIT");
        assert!(second.headers().contains_key(headers::X_CACHE_EXPIRES));
        assert!(second.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(hit_body, body);

        let conditional = HttpRequest::builder()
            .uri("/api/v1/diseases")
            .header(header::IF_NONE_MATCH, "\"abc\"")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let (third, empty) = send(&cache, conditional, counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(third.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(third.headers()[headers::X_CACHE], "HIT");
        assert!(empty.is_empty());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_if_none_match_wildcard_and_lists() {
        let cache = CacheMiddleware::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let conditional = |uri: &str, value: &str| {
            HttpRequest::builder()
                .uri(uri)
                .header(header::IF_NONE_MATCH, value)
                .body(Full::new(Bytes::new()))
                .unwrap()
        };

        send(&cache, get("/api/v1/vitamins"), counting(calls.clone(), ok_with_etag)).await;
        let (wildcard, _) = send(&cache, conditional("/api/v1/vitamins", "*"), counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(wildcard.status(), StatusCode::NOT_MODIFIED);

        let (listed, _) = send(
            &cache,
            conditional("/api/v1/vitamins", "\"old\", \"abc\""),
            counting(calls.clone(), ok_with_etag),
        )
        .await;
        assert_eq!(listed.status(), StatusCode::NOT_MODIFIED);

        let (stale, body) = send(&cache, conditional("/api/v1/vitamins", "\"old\""), counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(stale.status(), StatusCode::OK);
        assert_eq!(body, Bytes::from(r#"{"ok":true}"#));

        // No ETag on the entry: a wildcard cannot match.
        send(&cache, get("/api/v1/minerals"), counting(calls.clone(), short_lived)).await;
        let (untagged, _) = send(&cache, conditional("/api/v1/minerals", "*"), counting(calls.clone(), short_lived)).await;
        assert_eq!(untagged.status(), StatusCode::OK);
        assert_eq!(untagged.headers()[headers::X_CACHE], "HIT");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_if_modified_since_compares_dates() {
        let cache = CacheMiddleware::default();
        let calls = Arc::new(AtomicUsize::new(0));
        send(&cache, get("/api/v1/foods"), counting(calls.clone(), ok_with_etag)).await;

        let past = HttpRequest::builder()
            .uri("/api/v1/foods")
            .header(header::IF_MODIFIED_SINCE, "Wed, 21 Oct 2015 07:28:00 GMT")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let (response, _) = send(&cache, past, counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let future = HttpRequest::builder()
            .uri("/api/v1/foods")
            .header(
                header::IF_MODIFIED_SINCE,
                httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(3600)),
            )
            .body(Full::new(Bytes::new()))
            .unwrap();
        let (response, _) = send(&cache, future, counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_no_store_is_not_cached() {
        let cache = CacheMiddleware::default();
        let calls = Arc::new(AtomicUsize::new(0));
        send(&cache, get("/api/v1/me"), counting(calls.clone(), no_store)).await;
        let (second, _) = send(&cache, get("/api/v1/me"), counting(calls.clone(), no_store)).await;
        assert_eq!(second.headers()[headers::X_CACHE], "MISS");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = CacheMiddleware::default();
        let calls = Arc::new(AtomicUsize::new(0));
        send(&cache, get("/api/v1/missing"), counting(calls.clone(), not_found)).await;
        send(&cache, get("/api/v1/missing"), counting(calls.clone(), not_found)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn test_oversize_body_is_not_cached() {
        let cache = CacheMiddleware::new(CacheConfig {
            max_entry_bytes: 1024,
            ..CacheConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        send(&cache, get("/api/v1/big"), counting(calls.clone(), large)).await;
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_methods_bypass() {
        let cache = CacheMiddleware::default();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let post = HttpRequest::builder()
                .method(Method::POST)
                .uri("/api/v1/meals")
                .body(Full::new(Bytes::new()))
                .unwrap();
            let (response, _) = send(&cache, post, counting(calls.clone(), ok_with_etag)).await;
            assert!(!response.headers().contains_key(headers::X_CACHE));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_request_no_cache_bypasses() {
        let cache = CacheMiddleware::default();
        let calls = Arc::new(AtomicUsize::new(0));
        send(&cache, get("/api/v1/foods"), counting(calls.clone(), ok_with_etag)).await;

        let fresh = HttpRequest::builder()
            .uri("/api/v1/foods")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Full::new(Bytes::new()))
            .unwrap();
        send(&cache, fresh, counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_api_preset_skips_auth_and_varies_on_authorization() {
        let cache = CacheMiddleware::new(CacheConfig::api());
        let calls = Arc::new(AtomicUsize::new(0));

        send(&cache, get("/api/v1/auth/login"), counting(calls.clone(), ok_with_etag)).await;
        assert!(cache.store().is_empty());

        let as_user = |token: &str| {
            HttpRequest::builder()
                .uri("/api/v1/meals")
                .header(header::AUTHORIZATION, token)
                .body(Full::new(Bytes::new()))
                .unwrap()
        };
        send(&cache, as_user("Bearer a"), counting(calls.clone(), ok_with_etag)).await;
        let (other, _) = send(&cache, as_user("Bearer b"), counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(other.headers()[headers::X_CACHE], "MISS");
        assert_eq!(cache.stats().total_entries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age_sets_ttl() {
        let cache = CacheMiddleware::default();
        let calls = Arc::new(AtomicUsize::new(0));
        send(&cache, get("/api/v1/tick"), counting(calls.clone(), short_lived)).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        let (response, _) = send(&cache, get("/api/v1/tick"), counting(calls.clone(), short_lived)).await;
        assert_eq!(response.headers()[headers::X_CACHE], "MISS");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_variant() {
        let cache = CacheMiddleware::static_files("/static", Duration::from_secs(60));
        assert_eq!(cache.config().max_entry_bytes, STATIC_MAX_ENTRY_BYTES);
        let calls = Arc::new(AtomicUsize::new(0));

        send(&cache, get("/static/app.js?v=1"), counting(calls.clone(), ok_with_etag)).await;
        let (hit, _) = send(&cache, get("/static/app.js?v=2"), counting(calls.clone(), ok_with_etag)).await;
        assert_eq!(hit.headers()[headers::X_CACHE], "HIT");

        let (outside, _) = send(&cache, get("/api/v1/foods"), counting(calls.clone(), ok_with_etag)).await;
        assert!(!outside.headers().contains_key(headers::X_CACHE));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cache_control_parsing() {
        assert_eq!(max_age("public, max-age=60"), Some(Duration::from_secs(60)));
        assert_eq!(max_age("no-cache"), None);
        assert!(has_directive("private, No-Store", "no-store"));
        assert!(!has_directive("no-storey", "no-store"));
    }
}
