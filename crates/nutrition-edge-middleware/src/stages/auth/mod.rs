//! Public route gate, bearer authentication and admin guard.
//!
//! The three stages split identity handling:
//!
//! 1. [`PublicRouteGate`] marks requests whose path starts with a public
//!    prefix. Matching is byte-wise prefix, not pattern.
//! 2. [`AuthMiddleware`] skips marked requests. Otherwise it requires
//!    `Authorization: Bearer <token>`, verifies the HS256 token and writes the
//!    caller identity into the context.
//! 3. [`AdminGuard`] reads the admin flag from the context and never
//!    re-parses the token.
//!
//! Authentication failures are reported as `unauthorized` with a fixed
//! message. The verifier's reason only reaches the logs.

mod token;

pub use token::{TokenError, TokenIssuer, DEFAULT_REFRESH_LIFETIME, DEFAULT_TOKEN_LIFETIME};

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{client_ip, header_str, Request, Response};
use http::header;
use nutrition_edge_core::{CallerIdentity, EdgeError, SecurityEvent, Severity};
use nutrition_edge_telemetry::audit::event_types;
use nutrition_edge_telemetry::SecuritySink;
use std::sync::Arc;

/// Path prefixes served without authentication.
pub const DEFAULT_PUBLIC_ROUTES: &[&str] = &[
    "/health",
    "/api/v1/info",
    "/api/v1/public/",
    "/api/v1/auth/login",
    "/api/v1/auth/register",
    "/api/v1/auth/forgot-password",
    "/api/v1/auth/reset-password",
    "/api/v1/auth/verify-email",
    "/api/v1/auth/refresh",
    "/api/v1/auth/logout-all",
    "/api/v1/diseases",
    "/api/v1/injuries",
    "/api/v1/vitamins-minerals",
    "/api/v1/nutrition-data",
    "/api/v1/metabolism",
    "/api/v1/workout-techniques",
    "/api/v1/meal-plans",
    "/api/v1/drugs-nutrition",
    "/api/v1/validation",
];

/// Context marker set by [`PublicRouteGate`] on public requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicRoute;

/// Marks requests to public path prefixes.
#[derive(Debug, Clone)]
pub struct PublicRouteGate {
    prefixes: Vec<String>,
}

impl Default for PublicRouteGate {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_ROUTES.iter().map(|p| (*p).to_string()))
    }
}

impl PublicRouteGate {
    /// Creates a gate for the given ordered prefixes.
    #[must_use]
    pub fn new(prefixes: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefixes: prefixes.into_iter().collect(),
        }
    }

    /// Returns `true` if `path` starts with a public prefix.
    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| path.as_bytes().starts_with(prefix.as_bytes()))
    }

    /// Returns the configured prefixes.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Middleware for PublicRouteGate {
    fn name(&self) -> &'static str {
        "public_routes"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if self.is_public(request.uri().path()) {
                ctx.set_extension(PublicRoute);
            }
            next.run(ctx, request).await
        })
    }
}

/// Verifies bearer tokens and establishes the caller identity.
#[derive(Debug, Clone)]
pub struct AuthMiddleware {
    issuer: Arc<TokenIssuer>,
    sink: SecuritySink,
}

impl AuthMiddleware {
    /// Creates an auth stage that verifies with `issuer`.
    #[must_use]
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self {
            issuer,
            sink: SecuritySink::default(),
        }
    }

    /// Publishes authentication failures into `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: SecuritySink) -> Self {
        self.sink = sink;
        self
    }

    /// Extracts the bearer token from the `Authorization` header.
    fn bearer_token(request: &Request) -> Result<&str, EdgeError> {
        let value = match request.headers().get(header::AUTHORIZATION) {
            None => return Err(EdgeError::unauthorized("Authorization header required")),
            Some(value) => value,
        };
        let value = value
            .to_str()
            .map_err(|_| EdgeError::unauthorized("Invalid token").with_detail("non-ASCII header"))?;
        if value.is_empty() {
            return Err(EdgeError::unauthorized("Authorization header required"));
        }
        value
            .strip_prefix("Bearer ")
            .ok_or_else(|| EdgeError::unauthorized("Bearer token required"))
    }

    fn authenticate(&self, request: &Request) -> Result<CallerIdentity, EdgeError> {
        let token = Self::bearer_token(request)?;
        self.issuer.verify(token).map(CallerIdentity::from)
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if ctx.has_extension::<PublicRoute>() {
                return next.run(ctx, request).await;
            }

            match self.authenticate(&request) {
                Ok(identity) => {
                    ctx.set_identity(identity);
                    next.run(ctx, request).await
                }
                Err(error) => {
                    self.sink.publish(
                        SecurityEvent::new(
                            event_types::AUTHENTICATION_FAILURE,
                            Severity::Warning,
                            error.message(),
                        )
                        .with_request(
                            request.method().as_str(),
                            request.uri().path(),
                            client_ip(&request).as_deref(),
                            header_str(request.headers(), header::USER_AGENT),
                        )
                        .with_request_id(ctx.request_id().as_str())
                        .with_detail("reason", error.detail().unwrap_or_else(|| error.message())),
                    );
                    ctx.fail(error)
                }
            }
        })
    }
}

/// Rejects callers without the admin flag.
///
/// With no prefixes configured every request is guarded. With prefixes only
/// matching paths are.
#[derive(Debug, Clone, Default)]
pub struct AdminGuard {
    prefixes: Vec<String>,
    sink: SecuritySink,
}

impl AdminGuard {
    /// Creates a guard for every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a guard for paths starting with any of `prefixes`.
    #[must_use]
    pub fn for_prefixes(prefixes: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefixes: prefixes.into_iter().collect(),
            sink: SecuritySink::default(),
        }
    }

    /// Publishes authorization failures into `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: SecuritySink) -> Self {
        self.sink = sink;
        self
    }

    fn guards(&self, path: &str) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl Middleware for AdminGuard {
    fn name(&self) -> &'static str {
        "admin_guard"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if !self.guards(request.uri().path()) || ctx.is_admin() {
                return next.run(ctx, request).await;
            }

            self.sink.publish(
                SecurityEvent::new(
                    event_types::AUTHORIZATION_FAILURE,
                    Severity::Warning,
                    "Admin access required",
                )
                .with_request(
                    request.method().as_str(),
                    request.uri().path(),
                    client_ip(&request).as_deref(),
                    header_str(request.headers(), header::USER_AGENT),
                )
                .with_request_id(ctx.request_id().as_str())
                .with_user_id(ctx.user_id()),
            );
            ctx.fail(EdgeError::forbidden("Admin access required"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::collect_body;
    use bytes::Bytes;
    use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
    use http_body_util::Full;
    use nutrition_edge_core::{Claims, ErrorKind};

    const SECRET: &[u8] = b"auth-stage-test-secret";

    fn issuer() -> Arc<TokenIssuer> {
        Arc::new(TokenIssuer::new(SECRET).unwrap())
    }

    fn request(path: &str, authorization: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri(path);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn ok<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| {
            Box::pin(async {
                HttpResponse::builder()
                    .status(StatusCode::OK)
                    .body(Full::new(Bytes::new()))
                    .unwrap()
            })
        })
    }

    async fn error_message(response: Response) -> String {
        let body = collect_body(response.into_body()).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["message"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_public_prefix_matching() {
        let gate = PublicRouteGate::default();
        assert!(gate.is_public("/health"));
        assert!(gate.is_public("/api/v1/diseases/diabetes"));
        assert!(gate.is_public("/api/v1/auth/login"));
        assert!(!gate.is_public("/api/v1/auth/me"));
        assert!(!gate.is_public("/api/v1/meals"));
        assert!(!gate.is_public("/API/V1/DISEASES"));
    }

    #[tokio::test]
    async fn test_gate_marks_public_requests() {
        let gate = PublicRouteGate::default();
        let mut ctx = MiddlewareContext::new();
        gate.process(&mut ctx, request("/api/v1/info", None), ok()).await;
        assert!(ctx.has_extension::<PublicRoute>());

        let mut ctx = MiddlewareContext::new();
        gate.process(&mut ctx, request("/api/v1/meals", None), ok()).await;
        assert!(!ctx.has_extension::<PublicRoute>());
    }

    #[tokio::test]
    async fn test_public_route_skips_token_processing() {
        let auth = AuthMiddleware::new(issuer());
        let mut ctx = MiddlewareContext::new();
        ctx.set_extension(PublicRoute);

        let response = auth.process(&mut ctx, request("/health", None), ok()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(ctx.user_id().is_none());
    }

    #[tokio::test]
    async fn test_missing_header() {
        let sink = SecuritySink::default();
        let auth = AuthMiddleware::new(issuer()).with_sink(sink.clone());
        let mut ctx = MiddlewareContext::new();

        let response = auth.process(&mut ctx, request("/api/v1/meals", None), ok()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(response).await, "Authorization header required");
        assert_eq!(sink.metrics().snapshot().failed_authentications, 1);
    }

    #[tokio::test]
    async fn test_wrong_scheme() {
        let auth = AuthMiddleware::new(issuer());
        let mut ctx = MiddlewareContext::new();

        let response = auth
            .process(&mut ctx, request("/api/v1/meals", Some("Basic dXNlcjpwYXNz")), ok())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(response).await, "Bearer token required");
    }

    #[tokio::test]
    async fn test_invalid_token_hides_reason() {
        let auth = AuthMiddleware::new(issuer());
        let mut ctx = MiddlewareContext::new();

        let response = auth
            .process(&mut ctx, request("/api/v1/meals", Some("Bearer abc.def.ghi")), ok())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ctx.error().map(EdgeError::kind), Some(ErrorKind::Unauthorized));
        assert!(ctx.error().and_then(EdgeError::detail).is_some());
        assert_eq!(error_message(response).await, "Invalid token");
    }

    #[tokio::test]
    async fn test_valid_token_sets_identity() {
        let issuer = issuer();
        let token = issuer
            .issue_access_token("u-9", "nine@example.com", "admin", true)
            .unwrap();
        let auth = AuthMiddleware::new(issuer);
        let mut ctx = MiddlewareContext::new();

        let response = auth
            .process(&mut ctx, request("/api/v1/meals", Some(&format!("Bearer {token}"))), ok())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.user_id(), Some("u-9"));
        assert!(ctx.is_admin());
    }

    #[tokio::test]
    async fn test_not_yet_valid_token_is_rejected() {
        let issuer = issuer();
        let now = jsonwebtoken::get_current_timestamp();
        let token = issuer
            .sign(&Claims {
                user_id: "u-1".to_string(),
                email: "u1@example.com".to_string(),
                role: "member".to_string(),
                is_admin: false,
                iat: now,
                nbf: now + 30,
                exp: now + 600,
            })
            .unwrap();
        let auth = AuthMiddleware::new(issuer);
        let mut ctx = MiddlewareContext::new();

        let response = auth
            .process(&mut ctx, request("/api/v1/meals", Some(&format!("Bearer {token}"))), ok())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(ctx.user_id().is_none());
    }

    #[tokio::test]
    async fn test_admin_guard() {
        let guard = AdminGuard::new();

        let mut ctx = MiddlewareContext::new();
        let response = guard.process(&mut ctx, request("/api/v1/admin/users", None), ok()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_message(response).await, "Admin access required");

        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(CallerIdentity::User {
            user_id: "root".to_string(),
            email: "root@example.com".to_string(),
            role: "admin".to_string(),
            is_admin: true,
        });
        let response = guard.process(&mut ctx, request("/api/v1/admin/users", None), ok()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_guard_prefixes() {
        let guard = AdminGuard::for_prefixes(vec!["/api/v1/admin".to_string()]);
        let mut ctx = MiddlewareContext::new();
        let response = guard.process(&mut ctx, request("/api/v1/meals", None), ok()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut ctx = MiddlewareContext::new();
        let response = guard.process(&mut ctx, request("/api/v1/admin", None), ok()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
