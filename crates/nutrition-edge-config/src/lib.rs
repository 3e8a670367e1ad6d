//! Typed configuration for the nutrition edge.
//!
//! - TOML and JSON files
//! - Environment variable overrides
//! - Strict parsing (unknown fields fail)
//! - Layering: defaults or preset → files → env
//!
//! # Example
//!
//! ```no_run
//! use nutrition_edge_config::ConfigLoader;
//!
//! # fn main() -> Result<(), nutrition_edge_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("edge.toml")?
//!     .with_env_prefix("EDGE")
//!     .load()?;
//!
//! println!("listening on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_ms = 30000
//! validation_timeout_ms = 10000
//!
//! [auth]
//! jwt_secret = "change-me"
//! token_lifetime_secs = 86400
//!
//! [rate_limit]
//! store = "redis"
//! redis_url = "redis://127.0.0.1:6379/"
//! requests = 100
//! window_secs = 900
//!
//! [[rate_limit.groups]]
//! name = "auth"
//! path_prefixes = ["/api/v1/auth/login"]
//! requests = 5
//! window_secs = 900
//!
//! [cache]
//! max_entries = 500
//! vary_headers = ["Authorization"]
//!
//! [security_headers]
//! profile = "production"
//! domain = "api.example.com"
//!
//! [telemetry.logging]
//! level = "info"
//! json_format = true
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `EDGE__AUTH__JWT_SECRET=...`
//! - `EDGE__RATE_LIMIT__REQUESTS=50`
//! - `EDGE__VALIDATION__BLOCKED_IPS=10.0.0.1,10.0.0.2`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::EdgeConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;

/// Re-exported so callers can name the telemetry section.
pub use nutrition_edge_telemetry::TelemetryConfig;
