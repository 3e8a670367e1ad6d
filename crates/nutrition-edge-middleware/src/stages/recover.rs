//! Panic recovery.
//!
//! The outermost stage. A panic anywhere downstream, in a stage or in the
//! handler, is caught and converted into a 500 `internal` response. The panic
//! message is logged, bounded to a fixed length, keyed by request id.
//!
//! The unwind skips the request-id stage's response path, so the 500 is
//! stamped with `X-Request-Id` here.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{headers::X_REQUEST_ID, Request, Response};
use futures_util::FutureExt;
use http::HeaderValue;
use nutrition_edge_core::EdgeError;
use nutrition_edge_telemetry::metrics::record_panic;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Longest panic message that is logged.
const MAX_PANIC_MESSAGE_LEN: usize = 512;

/// Middleware that converts panics into 500 responses.
#[derive(Debug, Clone, Default)]
pub struct RecoverMiddleware {
    _priv: (),
}

impl RecoverMiddleware {
    /// Creates a new recover middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Middleware for RecoverMiddleware {
    fn name(&self) -> &'static str {
        "recover"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let outcome = AssertUnwindSafe(next.run(ctx, request)).catch_unwind().await;
            match outcome {
                Ok(response) => response,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(
                        request_id = %ctx.request_id(),
                        method = %method,
                        path = %path,
                        panic = %message,
                        "Recovered from panic"
                    );
                    record_panic();
                    let mut response =
                        ctx.fail(EdgeError::internal("Internal server error").with_detail(message));
                    if let Ok(value) = HeaderValue::from_str(ctx.request_id().as_str()) {
                        response.headers_mut().insert(X_REQUEST_ID, value);
                    }
                    response
                }
            }
        })
    }
}

/// Extracts a bounded message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };

    if message.len() <= MAX_PANIC_MESSAGE_LEN {
        return message;
    }
    let mut end = MAX_PANIC_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}
