//! # Nutrition Edge
//!
//! The HTTP edge of the nutrition API. Every request passes the same fixed
//! sequence of stages before a business handler sees it:
//!
//! ```text
//! Request → Recover → RequestId → Logging → Timeout → SecurityHeaders → CORS
//!         → Compression → PublicRoutes → Auth → AdminGuard → Validation
//!         → RateLimit → Cache → Handler
//! ```
//!
//! [`Edge::from_config`] assembles that pipeline from an
//! [`EdgeConfig`](config::EdgeConfig); [`EdgeServer`] serves it over
//! HTTP/1.1.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nutrition_edge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new()
//!         .with_defaults()
//!         .with_optional_file("edge.toml")?
//!         .with_env_prefix("EDGE")
//!         .load()?;
//!
//!     let sink = init_telemetry(&config.telemetry)?;
//!     let edge = Edge::with_sink(&config, sink)?;
//!
//!     EdgeServer::bind(&config.server, edge)
//!         .await?
//!         .serve(not_found, shutdown_signal())
//!         .await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/nutrition-edge/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod edge;
mod error;
mod server;

pub use edge::Edge;
pub use error::ServerError;
pub use server::{not_found, shutdown_signal, EdgeHandler, EdgeServer};

// Re-export the component crates
pub use nutrition_edge_config as config;
pub use nutrition_edge_core as core;
pub use nutrition_edge_middleware as middleware;
pub use nutrition_edge_telemetry as telemetry;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{not_found, shutdown_signal, Edge, EdgeHandler, EdgeServer, ServerError};

    pub use nutrition_edge_config::{ConfigError, ConfigLoader, EdgeConfig};
    pub use nutrition_edge_core::{CallerIdentity, EdgeError, ErrorKind, RequestId};
    pub use nutrition_edge_middleware::{
        BoxFuture, Middleware, MiddlewareContext, Next, Request, Response,
    };
    pub use nutrition_edge_telemetry::{init_telemetry, SecuritySink};
}
