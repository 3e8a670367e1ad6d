//! Configuration schema types.
//!
//! One struct per section. Every field has a serde default, so a file only
//! needs to name what it changes; unknown fields are rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// HTTP server section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Deadline for reading the request body, in milliseconds.
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_ms: u64,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            request_timeout_ms: default_request_timeout(),
            validation_timeout_ms: default_validation_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// Per-request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Body ingestion deadline.
    #[must_use]
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    /// Graceful shutdown deadline.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_validation_timeout() -> u64 {
    10_000
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Authentication section.
///
/// The signing secret has no default. It must come from a file or from
/// `EDGE__AUTH__JWT_SECRET`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Whether the auth and admin stages run.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HS256 signing secret.
    #[serde(default)]
    pub jwt_secret: String,

    /// Access-token lifetime in seconds.
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,

    /// Refresh-token lifetime in seconds.
    #[serde(default = "default_refresh_lifetime")]
    pub refresh_lifetime_secs: u64,

    /// Public path prefixes. `None` selects the built-in list.
    #[serde(default)]
    pub public_routes: Option<Vec<String>>,

    /// Path prefixes that require the admin flag.
    #[serde(default = "default_admin_prefixes")]
    pub admin_prefixes: Vec<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field(
                "jwt_secret",
                &if self.jwt_secret.is_empty() { "<empty>" } else { "<redacted>" },
            )
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .field("refresh_lifetime_secs", &self.refresh_lifetime_secs)
            .field("public_routes", &self.public_routes)
            .field("admin_prefixes", &self.admin_prefixes)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: String::new(),
            token_lifetime_secs: default_token_lifetime(),
            refresh_lifetime_secs: default_refresh_lifetime(),
            public_routes: None,
            admin_prefixes: default_admin_prefixes(),
        }
    }
}

fn default_token_lifetime() -> u64 {
    24 * 60 * 60
}

fn default_refresh_lifetime() -> u64 {
    7 * 24 * 60 * 60
}

fn default_admin_prefixes() -> Vec<String> {
    vec!["/api/v1/admin".to_string()]
}

/// Request validator section.
///
/// List fields left as `None` select the built-in lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ValidationSection {
    /// Whether the validator runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Largest accepted request, in bytes.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: u64,

    /// Content-type prefixes accepted on POST, PUT and PATCH.
    #[serde(default)]
    pub allowed_content_types: Option<Vec<String>>,

    /// User-agent substrings that are refused.
    #[serde(default)]
    pub blocked_user_agents: Option<Vec<String>>,

    /// Client IPs that are refused.
    #[serde(default)]
    pub blocked_ips: Vec<String>,

    /// Whether path, query and header patterns are checked.
    #[serde(default = "default_true")]
    pub enable_security_checks: bool,

    /// Whether responses are stamped and checked.
    #[serde(default = "default_true")]
    pub enable_response_validation: bool,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_request_bytes: default_max_request_bytes(),
            allowed_content_types: None,
            blocked_user_agents: None,
            blocked_ips: Vec::new(),
            enable_security_checks: true,
            enable_response_validation: true,
        }
    }
}

fn default_max_request_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Where rate-limit counters live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStoreKind {
    /// In-process map.
    #[default]
    Memory,
    /// Shared Redis instance.
    Redis,
}

/// A rate-limit profile for a set of path prefixes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitGroup {
    /// Group name; counters of different groups are independent.
    pub name: String,

    /// Path prefixes the group applies to.
    pub path_prefixes: Vec<String>,

    /// Requests admitted per window.
    pub requests: u64,

    /// Window length in seconds.
    pub window_secs: u64,
}

/// Rate limiter section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    /// Whether the limiter runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Counter store.
    #[serde(default)]
    pub store: RateLimitStoreKind,

    /// Redis URL, required when `store = "redis"`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Bound on a single store round-trip, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Requests admitted per window by the general limiter.
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Window length of the general limiter, in seconds.
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Header carrying API keys.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Paths that are never limited.
    #[serde(default = "default_rate_limit_skip_paths")]
    pub skip_paths: Vec<String>,

    /// Tighter profiles for specific route groups.
    #[serde(default = "default_groups")]
    pub groups: Vec<RateLimitGroup>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            store: RateLimitStoreKind::Memory,
            redis_url: None,
            store_timeout_ms: default_store_timeout(),
            requests: default_requests(),
            window_secs: default_window(),
            api_key_header: default_api_key_header(),
            skip_paths: default_rate_limit_skip_paths(),
            groups: default_groups(),
        }
    }
}

impl RateLimitSection {
    /// Window of the general limiter.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Store round-trip bound.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_store_timeout() -> u64 {
    5_000
}

fn default_requests() -> u64 {
    100
}

fn default_window() -> u64 {
    15 * 60
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_rate_limit_skip_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

fn default_groups() -> Vec<RateLimitGroup> {
    vec![RateLimitGroup {
        name: "auth".to_string(),
        path_prefixes: vec![
            "/api/v1/auth/login".to_string(),
            "/api/v1/auth/register".to_string(),
            "/api/v1/auth/forgot-password".to_string(),
            "/api/v1/auth/reset-password".to_string(),
        ],
        requests: 5,
        window_secs: 15 * 60,
    }]
}

/// Response cache section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Whether the cache runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TTL used when a response has no `max-age`, in seconds.
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    /// Capacity.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Largest stored body, in bytes.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: usize,

    /// Path prefixes that are never cached.
    #[serde(default = "default_cache_skip_prefixes")]
    pub skip_prefixes: Vec<String>,

    /// Request headers that partition the key.
    #[serde(default = "default_vary_headers")]
    pub vary_headers: Vec<String>,

    /// Subtree served through the static variant, if any.
    #[serde(default)]
    pub static_prefix: Option<String>,

    /// TTL of static entries, in seconds.
    #[serde(default = "default_static_ttl")]
    pub static_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: default_ttl(),
            max_entries: default_max_entries(),
            max_entry_bytes: default_max_entry_bytes(),
            skip_prefixes: default_cache_skip_prefixes(),
            vary_headers: default_vary_headers(),
            static_prefix: None,
            static_ttl_secs: default_static_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    5 * 60
}

fn default_max_entries() -> usize {
    500
}

fn default_max_entry_bytes() -> usize {
    1024 * 1024
}

fn default_cache_skip_prefixes() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/metrics".to_string(),
        "/api/v1/auth".to_string(),
    ]
}

fn default_vary_headers() -> Vec<String> {
    vec!["Authorization".to_string()]
}

fn default_static_ttl() -> u64 {
    60 * 60
}

/// Security header profiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeadersProfile {
    /// Relaxed CSP, no HSTS.
    Development,
    /// Strict CSP and HSTS for `domain`.
    Production,
    /// JSON endpoints.
    #[default]
    Api,
    /// Minimal set for health checks.
    Health,
    /// Exactly the `custom` map.
    Custom,
}

/// Security headers section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecurityHeadersSection {
    /// Whether the stage runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Active profile.
    #[serde(default)]
    pub profile: HeadersProfile,

    /// Domain of the production profile.
    #[serde(default)]
    pub domain: String,

    /// Extra headers, or the whole set for the custom profile.
    #[serde(default)]
    pub custom: BTreeMap<String, String>,

    /// Whether the `Server` header is removed.
    #[serde(default = "default_true")]
    pub hide_server_header: bool,
}

impl Default for SecurityHeadersSection {
    fn default() -> Self {
        Self {
            enabled: true,
            profile: HeadersProfile::Api,
            domain: String::new(),
            custom: BTreeMap::new(),
            hide_server_header: true,
        }
    }
}

/// Compression section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompressionSection {
    /// Whether the stage runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// gzip level, 1 to 9.
    #[serde(default = "default_compression_level")]
    pub level: u32,

    /// Smallest body that is compressed, in bytes.
    #[serde(default = "default_min_size")]
    pub min_size: usize,
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_compression_level(),
            min_size: default_min_size(),
        }
    }
}

fn default_compression_level() -> u32 {
    5
}

fn default_min_size() -> usize {
    1024
}

/// CORS section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsSection {
    /// Whether the stage runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed origins; `*` allows any.
    #[serde(default = "default_star")]
    pub allowed_origins: Vec<String>,

    /// Allowed methods.
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,

    /// Allowed request headers; `*` allows any.
    #[serde(default = "default_star")]
    pub allowed_headers: Vec<String>,

    /// Headers exposed to scripts.
    #[serde(default)]
    pub exposed_headers: Vec<String>,

    /// Whether credentials are allowed.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: default_star(),
            allowed_methods: default_cors_methods(),
            allowed_headers: default_star(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: default_cors_max_age(),
        }
    }
}

fn default_star() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_cors_max_age() -> u64 {
    86_400
}

/// Request logger section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Whether the request logger runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Paths that are not logged.
    #[serde(default = "default_log_skip_paths")]
    pub skip_paths: Vec<String>,

    /// Whether health checks are skipped.
    #[serde(default = "default_true")]
    pub skip_health: bool,

    /// Whether request bodies are logged.
    #[serde(default)]
    pub log_request_body: bool,

    /// Whether response bodies are logged.
    #[serde(default)]
    pub log_response_body: bool,

    /// Largest body that is logged, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Requests slower than this are reported, in milliseconds. 0 disables.
    #[serde(default = "default_slow_threshold")]
    pub slow_request_threshold_ms: u64,

    /// Requests between metrics rollups. 0 disables.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: u64,

    /// Whether suspicious request patterns raise security alerts.
    #[serde(default = "default_true")]
    pub security_events: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_paths: default_log_skip_paths(),
            skip_health: true,
            log_request_body: false,
            log_response_body: false,
            max_body_bytes: default_max_body_bytes(),
            slow_request_threshold_ms: default_slow_threshold(),
            metrics_interval: default_metrics_interval(),
            security_events: true,
        }
    }
}

fn default_log_skip_paths() -> Vec<String> {
    vec!["/health".to_string(), "/metrics".to_string()]
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_slow_threshold() -> u64 {
    1_000
}

fn default_metrics_interval() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_defaults() {
        let rate_limit = RateLimitSection::default();
        assert_eq!(rate_limit.requests, 100);
        assert_eq!(rate_limit.window(), Duration::from_secs(900));
        assert_eq!(rate_limit.groups[0].requests, 5);

        let cache = CacheSection::default();
        assert_eq!(cache.default_ttl_secs, 300);
        assert_eq!(cache.max_entry_bytes, 1024 * 1024);

        assert_eq!(CompressionSection::default().level, 5);
        assert_eq!(ServerConfig::default().request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<CacheSection, _> = serde_json::from_str(r#"{"max_entris": 10}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let cache: CacheSection = serde_json::from_str(r#"{"max_entries": 10}"#).unwrap();
        assert_eq!(cache.max_entries, 10);
        assert_eq!(cache.default_ttl_secs, 300);
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let auth = AuthConfig {
            jwt_secret: "super-secret".to_string(),
            ..AuthConfig::default()
        };
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_store_kind_names() {
        let kind: RateLimitStoreKind = serde_json::from_str(r#""redis""#).unwrap();
        assert_eq!(kind, RateLimitStoreKind::Redis);
    }
}
