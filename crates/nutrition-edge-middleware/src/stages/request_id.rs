//! Request ID middleware.
//!
//! Adopts the client's `X-Request-Id` when it is present and well formed,
//! otherwise generates a UUID v7. The id is stored in the context before any
//! later stage runs and echoed on every response, including rejections.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{headers::X_REQUEST_ID, Request, Response};
use http::HeaderValue;
use nutrition_edge_core::RequestId;

/// Middleware that generates or propagates request IDs.
#[derive(Debug, Clone)]
pub struct RequestIdMiddleware {
    /// Whether to adopt a client-supplied `X-Request-Id`.
    trust_incoming: bool,
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self {
            trust_incoming: true,
        }
    }
}

impl RequestIdMiddleware {
    /// Creates a middleware that adopts well-formed incoming ids.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a middleware that always generates a fresh id.
    #[must_use]
    pub fn always_generate() -> Self {
        Self {
            trust_incoming: false,
        }
    }

    fn extract_request_id(&self, request: &Request) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }

        request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::parse)
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request_id = self
                .extract_request_id(&request)
                .unwrap_or_else(RequestId::new);
            ctx.set_request_id(request_id);

            let mut response = next.run(ctx, request).await;

            if let Ok(value) = HeaderValue::from_str(ctx.request_id().as_str()) {
                response.headers_mut().insert(X_REQUEST_ID, value);
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;

    fn create_request_with_id(request_id: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri("/test");
        if let Some(id) = request_id {
            builder = builder.header(X_REQUEST_ID, id);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn handler<'a>() -> Next<'a> {
        Next::handler(|ctx, _req| {
            let seen = ctx.request_id().to_string();
            Box::pin(async move {
                HttpResponse::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from(seen)))
                    .unwrap()
            })
        })
    }

    #[tokio::test]
    async fn test_generates_request_id_when_missing() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(&mut ctx, create_request_with_id(None), handler())
            .await;

        let header_id = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap();
        assert!(uuid_like(header_id));
        assert_eq!(ctx.request_id().as_str(), header_id);
    }

    #[tokio::test]
    async fn test_adopts_incoming_id() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(&mut ctx, create_request_with_id(Some("client-abc-123")), handler())
            .await;

        assert_eq!(response.headers().get(X_REQUEST_ID).unwrap(), "client-abc-123");
        assert_eq!(ctx.request_id().as_str(), "client-abc-123");
    }

    #[tokio::test]
    async fn test_handler_sees_request_id() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(&mut ctx, create_request_with_id(Some("seen-by-handler")), handler())
            .await;

        let body = crate::types::collect_body(response.into_body()).await;
        assert_eq!(&body[..], b"seen-by-handler");
    }

    #[tokio::test]
    async fn test_always_generate_ignores_incoming() {
        let middleware = RequestIdMiddleware::always_generate();
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(&mut ctx, create_request_with_id(Some("client-abc-123")), handler())
            .await;

        assert_ne!(response.headers().get(X_REQUEST_ID).unwrap(), "client-abc-123");
    }

    #[tokio::test]
    async fn test_malformed_incoming_id_is_replaced() {
        let middleware = RequestIdMiddleware::new();
        let mut ctx = MiddlewareContext::new();
        let too_long = "x".repeat(200);

        let response = middleware
            .process(&mut ctx, create_request_with_id(Some(&too_long)), handler())
            .await;

        let header_id = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap();
        assert_ne!(header_id, too_long);
        assert!(uuid_like(header_id));
    }

    fn uuid_like(s: &str) -> bool {
        s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4
    }
}
