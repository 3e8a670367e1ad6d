//! Per-request deadline.
//!
//! Everything downstream of this stage, including the remote rate-limit store
//! and the handler, runs under a single deadline. When it elapses the
//! downstream future is dropped, which cancels any pending I/O, and the
//! request is answered with a 408 `timeout`.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use nutrition_edge_core::EdgeError;
use std::time::Duration;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Middleware that bounds the time spent downstream.
#[derive(Debug, Clone)]
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl Default for TimeoutMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl TimeoutMiddleware {
    /// Creates a timeout middleware with the given deadline.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Returns the configured deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let outcome = tokio::time::timeout(self.timeout, next.run(ctx, request)).await;
            match outcome {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Request deadline exceeded"
                    );
                    ctx.fail(
                        EdgeError::timeout("Request timeout")
                            .with_detail(format!("deadline of {:?} elapsed", self.timeout)),
                    )
                }
            }
        })
    }
}
