//! Fixed-order middleware pipeline.
//!
//! Stages are registered against a [`Stage`] slot and the builder orders them
//! by slot, so the execution order is fixed at build time no matter how the
//! pipeline was assembled. Several middlewares may share a slot (the logger
//! variants do); those keep their registration order.
//!
//! ```text
//! Request → Recover → RequestId → Logging → Timeout → SecurityHeaders → Cors
//!         → Compression → PublicRoutes → Auth → AdminGuard → Validation
//!         → RateLimit → Cache → Handler
//! ```
//!
//! Response-side work happens as each stage's future resumes after
//! `next.run()`, so it runs in the reverse order: the cache stores before
//! compression encodes, and compression encodes before the logger finishes.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Pipeline slot of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Converts panics into 500 responses.
    Recover = 1,
    /// Assigns the correlation id.
    RequestId = 2,
    /// Request, slow-request, security-event and periodic metrics loggers.
    Logging = 3,
    /// Per-request deadline.
    Timeout = 4,
    /// Security headers and the server-header rewrite.
    SecurityHeaders = 5,
    /// Cross-origin resource sharing.
    Cors = 6,
    /// Response compression.
    Compression = 7,
    /// Marks requests whose path is on the public-route list.
    PublicRoutes = 8,
    /// Bearer token verification.
    Auth = 9,
    /// Admin flag check.
    AdminGuard = 10,
    /// Size, content-type, caller and pattern checks.
    Validation = 11,
    /// Per-identity quota.
    RateLimit = 12,
    /// Response cache.
    Cache = 13,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Recover => "recover",
            Self::RequestId => "request_id",
            Self::Logging => "logging",
            Self::Timeout => "timeout",
            Self::SecurityHeaders => "security_headers",
            Self::Cors => "cors",
            Self::Compression => "compression",
            Self::PublicRoutes => "public_routes",
            Self::Auth => "auth",
            Self::AdminGuard => "admin_guard",
            Self::Validation => "validation",
            Self::RateLimit => "rate_limit",
            Self::Cache => "cache",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 13] {
        [
            Self::Recover,
            Self::RequestId,
            Self::Logging,
            Self::Timeout,
            Self::SecurityHeaders,
            Self::Cors,
            Self::Compression,
            Self::PublicRoutes,
            Self::Auth,
            Self::AdminGuard,
            Self::Validation,
            Self::RateLimit,
            Self::Cache,
        ]
    }
}

/// The fixed-order middleware pipeline.
///
/// Immutable once built and cheap to share behind an `Arc`.
///
/// # Example
///
/// ```
/// use nutrition_edge_middleware::pipeline::{Pipeline, Stage};
/// use nutrition_edge_middleware::stages::{RecoverMiddleware, RequestIdMiddleware};
///
/// let pipeline = Pipeline::builder()
///     .stage(Stage::RequestId, RequestIdMiddleware::new())
///     .stage(Stage::Recover, RecoverMiddleware::new())
///     .build();
///
/// assert_eq!(pipeline.stage_names(), vec!["recover", "request_id"]);
/// ```
pub struct Pipeline {
    stages: Vec<(Stage, BoxedMiddleware)>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Processes a request through every stage and the handler.
    pub async fn process<H>(
        &self,
        mut ctx: MiddlewareContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(&mut ctx, request).await
    }

    /// Processes a request with a fresh context.
    pub async fn handle<H>(&self, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        self.process(MiddlewareContext::new(), request, handler).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for (_, middleware) in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all middleware in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|(_, mw)| mw.name()).collect()
    }

    /// Returns the slots in execution order, one per registered middleware.
    #[must_use]
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.iter().map(|(stage, _)| *stage).collect()
    }

    /// Returns the number of registered middleware.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<(Stage, BoxedMiddleware)>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a middleware in the given slot.
    #[must_use]
    pub fn stage<M: Middleware>(self, stage: Stage, middleware: M) -> Self {
        self.stage_arc(stage, Arc::new(middleware))
    }

    /// Registers a shared middleware in the given slot.
    #[must_use]
    pub fn stage_arc(mut self, stage: Stage, middleware: BoxedMiddleware) -> Self {
        self.stages.push((stage, middleware));
        self
    }

    /// Registers a middleware when `middleware` is `Some`.
    #[must_use]
    pub fn stage_opt<M: Middleware>(self, stage: Stage, middleware: Option<M>) -> Self {
        match middleware {
            Some(m) => self.stage(stage, m),
            None => self,
        }
    }

    /// Builds the pipeline, ordering stages by slot.
    #[must_use]
    pub fn build(mut self) -> Pipeline {
        // Stable, so middleware sharing a slot keep their registration order.
        self.stages.sort_by_key(|(stage, _)| *stage);
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;
    use std::sync::Mutex;

    struct OrderTracking {
        name: &'static str,
        order: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for OrderTracking {
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
                self.order.lock().unwrap().push(format!("{}:pre", self.name));
                let response = next.run(ctx, request).await;
                self.order.lock().unwrap().push(format!("{}:post", self.name));
                response
            })
        }
    }

    fn request() -> Request {
        HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok(_ctx: &mut MiddlewareContext, _req: Request) -> BoxFuture<'static, Response> {
        Box::pin(async {
            HttpResponse::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::from("OK")))
                .unwrap()
        })
    }

    #[tokio::test]
    async fn test_stages_sorted_by_slot() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let track = |name| OrderTracking {
            name,
            order: order.clone(),
        };

        let pipeline = Pipeline::builder()
            .stage(Stage::Cache, track("cache"))
            .stage(Stage::Auth, track("auth"))
            .stage(Stage::RateLimit, track("rate_limit"))
            .stage(Stage::Recover, track("recover"))
            .build();

        assert_eq!(
            pipeline.stage_names(),
            vec!["recover", "auth", "rate_limit", "cache"]
        );

        let response = pipeline.handle(request(), ok).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "recover:pre",
                "auth:pre",
                "rate_limit:pre",
                "cache:pre",
                "cache:post",
                "rate_limit:post",
                "auth:post",
                "recover:post",
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_slot_keeps_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .stage(Stage::Logging, OrderTracking { name: "a", order: order.clone() })
            .stage(Stage::RequestId, OrderTracking { name: "id", order: order.clone() })
            .stage(Stage::Logging, OrderTracking { name: "b", order: order.clone() })
            .build();

        assert_eq!(pipeline.stage_names(), vec!["id", "a", "b"]);
        assert_eq!(
            pipeline.stages(),
            vec![Stage::RequestId, Stage::Logging, Stage::Logging]
        );
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let pipeline = Pipeline::builder().build();
        assert_eq!(pipeline.stage_count(), 0);
        let response = pipeline.handle(request(), ok).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_stage_ordering() {
        let all = Stage::all();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert!(Stage::Auth < Stage::RateLimit);
        assert!(Stage::RateLimit < Stage::Cache);
        assert_eq!(all[0].name(), "recover");
        assert_eq!(all[12].name(), "cache");
    }

    #[test]
    fn test_stage_opt() {
        struct Noop;
        impl Middleware for Noop {
            fn name(&self) -> &'static str {
                "noop"
            }
            fn process<'a>(
                &'a self,
                ctx: &'a mut MiddlewareContext,
                request: Request,
                next: Next<'a>,
            ) -> BoxFuture<'a, Response> {
                Box::pin(next.run(ctx, request))
            }
        }

        let pipeline = Pipeline::builder()
            .stage_opt(Stage::Cors, Some(Noop))
            .stage_opt::<Noop>(Stage::Cache, None)
            .build();
        assert_eq!(pipeline.stage_count(), 1);
    }
}
