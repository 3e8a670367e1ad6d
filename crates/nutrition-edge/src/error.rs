//! Errors raised while assembling or running the edge.

use nutrition_edge_config::ConfigError;
use nutrition_edge_middleware::stages::{StoreError, TokenError};
use thiserror::Error;

/// Errors from [`Edge::from_config`](crate::Edge::from_config) and the
/// server adapter.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The token issuer could not be built.
    #[error("failed to build token issuer: {0}")]
    Token(#[from] TokenError),

    /// The rate-limit store could not be built.
    #[error("failed to build rate-limit store: {0}")]
    Store(#[from] StoreError),

    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error on the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}
