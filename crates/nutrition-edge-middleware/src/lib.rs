//! # Nutrition Edge Middleware
//!
//! The request-processing pipeline of the nutrition API: every request
//! traverses the same ordered set of stages before it reaches a business
//! handler, and the response passes back through them in reverse.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → Recover → RequestId → Logging → Timeout → SecurityHeaders → CORS
//!         → Compression → PublicRoutes → Auth → AdminGuard → Validation
//!         → RateLimit → Cache ─┬─ HIT: cached response
//!                              └─ MISS: Handler → cache store
//! Response ← log finish ← compress ←──────────────┘
//! ```
//!
//! | Slot | Middleware | Purpose |
//! |------|------------|---------|
//! | 1 | [`RecoverMiddleware`](stages::RecoverMiddleware) | Panic → 500 |
//! | 2 | [`RequestIdMiddleware`](stages::RequestIdMiddleware) | Correlation id |
//! | 3 | [`RequestLogger`](stages::RequestLogger) and friends | One record per request |
//! | 4 | [`TimeoutMiddleware`](stages::TimeoutMiddleware) | Per-request deadline |
//! | 5 | [`SecurityHeadersMiddleware`](stages::SecurityHeadersMiddleware) | Hardening headers |
//! | 6 | [`CorsMiddleware`](stages::CorsMiddleware) | Cross-origin policy |
//! | 7 | [`CompressionMiddleware`](stages::CompressionMiddleware) | gzip |
//! | 8 | [`PublicRouteGate`](stages::PublicRouteGate) | Public path allow-list |
//! | 9 | [`AuthMiddleware`](stages::AuthMiddleware) | Bearer token → identity |
//! | 10 | [`AdminGuard`](stages::AdminGuard) | Admin flag |
//! | 11 | [`ValidationMiddleware`](stages::ValidationMiddleware) | Safety sieve |
//! | 12 | [`RateLimitMiddleware`](stages::RateLimitMiddleware) | Per-identity quota |
//! | 13 | [`CacheMiddleware`](stages::CacheMiddleware) | Response cache |
//!
//! ## Example
//!
//! ```
//! use nutrition_edge_middleware::pipeline::{Pipeline, Stage};
//! use nutrition_edge_middleware::stages::{RecoverMiddleware, RequestIdMiddleware};
//!
//! let pipeline = Pipeline::builder()
//!     .stage(Stage::Recover, RecoverMiddleware::new())
//!     .stage(Stage::RequestId, RequestIdMiddleware::new())
//!     .build();
//! assert_eq!(pipeline.stage_count(), 2);
//! ```

#![doc(html_root_url = "https://docs.rs/nutrition-edge-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Handler, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder, Stage};
pub use types::{client_ip, collect_body, error_response, ClientAddr, Request, Response, ResponseExt};
