//! Core middleware trait and types.
//!
//! Every stage implements [`Middleware`]. A stage receives the mutable
//! per-request context, the request, and a [`Next`] continuation. It either
//! forwards by calling [`Next::run`] exactly once, or short-circuits by
//! returning its own response without calling it.
//!
//! # Example
//!
//! ```
//! use nutrition_edge_middleware::{BoxFuture, Middleware, MiddlewareContext, Next, Request, Response};
//!
//! struct ServedBy;
//!
//! impl Middleware for ServedBy {
//!     fn name(&self) -> &'static str {
//!         "served_by"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut MiddlewareContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             let mut response = next.run(ctx, request).await;
//!             response
//!                 .headers_mut()
//!                 .insert("x-served-by", http::HeaderValue::from_static("edge"));
//!             response
//!         })
//!     }
//! }
//! ```

use crate::context::MiddlewareContext;
use crate::types::{Request, Response};
use std::future::Future;
use std::pin::Pin;

/// A boxed future that returns a response.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The terminal handler of a pipeline.
///
/// Receives the context as written by every stage and the request, and
/// returns a `'static` future so it can run detached from the context borrow.
pub type Handler<'a> =
    Box<dyn FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a>;

/// The core middleware trait.
///
/// # Invariants
///
/// - A stage calls `next.run()` at most once.
/// - A stage that rejects does so by returning a complete response, usually
///   through [`MiddlewareContext::fail`]. It never forwards and then fails.
/// - No lock is held across `next.run()`.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this stage, used for logging.
    fn name(&self) -> &'static str;

    /// Process the request through this stage.
    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// Continuation that invokes the rest of the pipeline.
///
/// Consumed by [`run`](Next::run), so it can be invoked only once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(Handler<'a>),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that will invoke the given middleware.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    pub(crate) fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next middleware or the handler.
    pub async fn run(self, ctx: &mut MiddlewareContext, request: Request) -> Response {
        match self.inner {
            NextInner::Chain { middleware, next } => {
                middleware.process(ctx, request, *next).await
            }
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;

    struct Visit {
        name: &'static str,
    }

    #[derive(Debug, Default)]
    struct Visited(Vec<&'static str>);

    impl Middleware for Visit {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                let mut visited = ctx.remove_extension::<Visited>().unwrap_or_default();
                visited.0.push(self.name);
                ctx.set_extension(visited);
                next.run(ctx, request).await
            })
        }
    }

    fn ok_handler<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| {
            Box::pin(async {
                HttpResponse::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::from("OK")))
                    .unwrap()
            })
        })
    }

    fn request() -> Request {
        HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_next_handler() {
        let mut ctx = MiddlewareContext::new();
        let response = ok_handler().run(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_chain() {
        let first = Visit { name: "first" };
        let second = Visit { name: "second" };
        let mut ctx = MiddlewareContext::new();

        let next = Next::new(&first, Next::new(&second, ok_handler()));
        let response = next.run(&mut ctx, request()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            ctx.get_extension::<Visited>().unwrap().0,
            vec!["first", "second"]
        );
    }
}
