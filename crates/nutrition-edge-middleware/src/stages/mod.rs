//! Pipeline stages.
//!
//! Each stage lives in its own module and is attached to a
//! [`Stage`](crate::pipeline::Stage) slot by the pipeline builder.
//!
//! ## Outer stages
//!
//! 1. [`recover`] - Panic containment
//! 2. [`request_id`] - Correlation id
//! 3. [`logging`] - Request records, slow requests, security alerts, rollups
//! 4. [`timeout`] - Per-request deadline
//! 5. [`security_headers`] - Hardening headers and `Server` header control
//! 6. [`cors`] - Cross-origin policy
//! 7. [`compression`] - gzip
//!
//! ## Gate stages
//!
//! 8. [`auth`] - Public routes, bearer tokens, admin guard
//! 9. [`validation`] - Size, type, agent, IP and pattern checks
//! 10. [`rate_limit`] - Per-identity quota
//! 11. [`cache`] - Response cache

pub mod auth;
pub mod cache;
pub mod compression;
pub mod cors;
pub mod logging;
pub mod rate_limit;
pub mod recover;
pub mod request_id;
pub mod security_headers;
pub mod timeout;
pub mod validation;

pub use auth::{
    AdminGuard, AuthMiddleware, PublicRoute, PublicRouteGate, TokenError, TokenIssuer,
    DEFAULT_PUBLIC_ROUTES,
};
pub use cache::{CacheConfig, CacheKeyer, CacheMiddleware, CacheStats, ResponseStore};
pub use compression::{CompressionConfig, CompressionMiddleware};
pub use cors::{AllowedOrigins, CorsConfig, CorsMiddleware};
pub use logging::{
    MetricsLogger, RequestLogger, RequestLoggerConfig, RequestRecord, SecurityEventLogger,
    SlowRequestLogger,
};
pub use rate_limit::{
    Decision, IdentityExtractor, MemoryStore, RateLimitConfig, RateLimitMiddleware,
    RateLimitStore, RedisStore, StoreError,
};
pub use recover::RecoverMiddleware;
pub use request_id::RequestIdMiddleware;
pub use security_headers::{
    HstsConfig, SecurityHeadersConfig, SecurityHeadersMiddleware, ServerHeaderMiddleware,
};
pub use timeout::TimeoutMiddleware;
pub use validation::{ValidationConfig, ValidationMiddleware};
