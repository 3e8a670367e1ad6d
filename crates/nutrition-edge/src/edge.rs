//! Pipeline assembly from configuration.
//!
//! [`Edge::from_config`] turns an [`EdgeConfig`] into the fixed-order
//! pipeline. A disabled section leaves its slot empty; the order of the
//! remaining stages never changes.

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use nutrition_edge_config::{
    AuthConfig, CacheSection, ConfigError, CorsSection, EdgeConfig, HeadersProfile,
    LoggingSection, RateLimitSection, RateLimitStoreKind, SecurityHeadersSection,
    ValidationSection,
};
use nutrition_edge_middleware::pipeline::{Pipeline, PipelineBuilder, Stage};
use nutrition_edge_middleware::stages::{
    AdminGuard, AuthMiddleware, CacheConfig, CacheMiddleware, CacheStats, CompressionMiddleware,
    CorsMiddleware, MemoryStore, MetricsLogger, PublicRouteGate, RateLimitMiddleware,
    RateLimitStore, RecoverMiddleware, RedisStore, RequestIdMiddleware, RequestLogger,
    RequestLoggerConfig, SecurityEventLogger, SecurityHeadersConfig, SecurityHeadersMiddleware,
    ServerHeaderMiddleware, SlowRequestLogger, TimeoutMiddleware, TokenIssuer, ValidationConfig,
    ValidationMiddleware,
};
use nutrition_edge_middleware::{BoxFuture, MiddlewareContext, Request, Response};
use nutrition_edge_telemetry::SecuritySink;

use crate::ServerError;

/// An assembled edge pipeline plus the shared state callers may inspect.
///
/// # Example
///
/// ```
/// use nutrition_edge::Edge;
/// use nutrition_edge_config::EdgeConfig;
///
/// let mut config = EdgeConfig::default();
/// config.auth.jwt_secret = "a-long-and-random-signing-secret".to_string();
///
/// let edge = Edge::from_config(&config).unwrap();
/// assert_eq!(edge.pipeline().stage_names()[0], "recover");
/// ```
#[derive(Debug, Clone)]
pub struct Edge {
    pipeline: Arc<Pipeline>,
    sink: SecuritySink,
    issuer: Option<Arc<TokenIssuer>>,
    cache: Option<CacheMiddleware>,
}

impl Edge {
    /// Builds the pipeline with a fresh security sink sized from
    /// `config.telemetry.audit_capacity`.
    ///
    /// # Errors
    ///
    /// See [`Edge::with_sink`].
    pub fn from_config(config: &EdgeConfig) -> Result<Self, ServerError> {
        Self::with_sink(config, SecuritySink::new(config.telemetry.audit_capacity))
    }

    /// Builds the pipeline publishing security events into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for an enabled auth section without a
    /// secret or an unknown CORS method, [`ServerError::Token`] if the issuer
    /// cannot be built and [`ServerError::Store`] for an invalid Redis URL.
    pub fn with_sink(config: &EdgeConfig, sink: SecuritySink) -> Result<Self, ServerError> {
        let mut builder = Pipeline::builder()
            .stage(Stage::Recover, RecoverMiddleware::new())
            .stage(Stage::RequestId, RequestIdMiddleware::new())
            .stage(
                Stage::Timeout,
                TimeoutMiddleware::new(config.server.request_timeout()),
            );

        builder = logging_stages(builder, &config.logging, &sink);
        builder = security_header_stages(builder, &config.security_headers);

        if config.cors.enabled {
            builder = builder.stage(Stage::Cors, cors(&config.cors)?);
        }

        if config.compression.enabled {
            builder = builder.stage(
                Stage::Compression,
                CompressionMiddleware::builder()
                    .level(config.compression.level)
                    .min_size(config.compression.min_size)
                    .build(),
            );
        }

        let issuer = if config.auth.enabled {
            let issuer = Arc::new(issuer(&config.auth)?);
            builder = auth_stages(builder, &config.auth, &issuer, &sink);
            Some(issuer)
        } else {
            None
        };

        if config.validation.enabled {
            builder = builder.stage(
                Stage::Validation,
                ValidationMiddleware::new(validation(&config.validation)).with_sink(sink.clone()),
            );
        }

        if config.rate_limit.enabled {
            builder = rate_limit_stages(builder, &config.rate_limit, &sink)?;
        }

        let cache = if config.cache.enabled {
            let (next, cache) = cache_stages(builder, &config.cache);
            builder = next;
            Some(cache)
        } else {
            None
        };

        let pipeline = builder.build();
        tracing::info!(stages = ?pipeline.stage_names(), "Edge pipeline assembled");

        Ok(Self {
            pipeline: Arc::new(pipeline),
            sink,
            issuer,
            cache,
        })
    }

    /// Runs `request` through the pipeline, ending in `handler`.
    pub async fn handle<H>(&self, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        self.pipeline.handle(request, handler).await
    }

    /// The assembled pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The sink every stage publishes security events into.
    #[must_use]
    pub fn sink(&self) -> &SecuritySink {
        &self.sink
    }

    /// The token issuer, when auth is enabled.
    #[must_use]
    pub fn issuer(&self) -> Option<&Arc<TokenIssuer>> {
        self.issuer.as_ref()
    }

    /// Statistics of the general response cache, when enabled.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(CacheMiddleware::stats)
    }

    /// Drops every cached response.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

fn logging_stages(
    mut builder: PipelineBuilder,
    section: &LoggingSection,
    sink: &SecuritySink,
) -> PipelineBuilder {
    if !section.enabled {
        return builder;
    }

    builder = builder.stage(
        Stage::Logging,
        RequestLogger::new(RequestLoggerConfig {
            skip_paths: section.skip_paths.clone(),
            skip_health: section.skip_health,
            log_request_body: section.log_request_body,
            log_response_body: section.log_response_body,
            max_body_bytes: section.max_body_bytes,
        }),
    );
    if section.slow_request_threshold_ms > 0 {
        builder = builder.stage(
            Stage::Logging,
            SlowRequestLogger::new(Duration::from_millis(section.slow_request_threshold_ms)),
        );
    }
    if section.security_events {
        builder = builder.stage(Stage::Logging, SecurityEventLogger::new(sink.clone()));
    }
    if section.metrics_interval > 0 {
        builder = builder.stage(Stage::Logging, MetricsLogger::new(section.metrics_interval));
    }
    builder
}

fn security_header_stages(
    mut builder: PipelineBuilder,
    section: &SecurityHeadersSection,
) -> PipelineBuilder {
    if !section.enabled {
        return builder;
    }

    let mut config = match section.profile {
        HeadersProfile::Development => SecurityHeadersConfig::development(),
        HeadersProfile::Production => SecurityHeadersConfig::production(&section.domain),
        HeadersProfile::Api => SecurityHeadersConfig::api(),
        HeadersProfile::Health => SecurityHeadersConfig::health(),
        HeadersProfile::Custom => SecurityHeadersConfig {
            content_type_nosniff: false,
            frame_options: None,
            xss_protection: None,
            content_security_policy: None,
            referrer_policy: None,
            hsts: None,
            permissions_policy: None,
            cross_origin_embedder_policy: None,
            cross_origin_opener_policy: None,
            cross_origin_resource_policy: None,
            custom_headers: section.custom.clone(),
            skipper: None,
        },
    };
    if section.profile != HeadersProfile::Custom {
        config.custom_headers.extend(section.custom.clone());
    }

    builder = builder.stage(Stage::SecurityHeaders, SecurityHeadersMiddleware::new(config));
    if section.hide_server_header {
        builder = builder.stage(Stage::SecurityHeaders, ServerHeaderMiddleware::remove());
    }
    builder
}

fn cors(section: &CorsSection) -> Result<CorsMiddleware, ConfigError> {
    let methods = section
        .allowed_methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                ConfigError::invalid_value("cors.allowed_methods", format!("unknown method: {m}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = CorsMiddleware::builder()
        .allow_origins(section.allowed_origins.iter().cloned())
        .allow_methods(methods)
        .allow_headers(section.allowed_headers.iter().cloned())
        .expose_headers(section.exposed_headers.iter().cloned())
        .allow_credentials(section.allow_credentials);
    if section.max_age_secs > 0 {
        builder = builder.max_age(Duration::from_secs(section.max_age_secs));
    }
    Ok(builder.build())
}

fn issuer(section: &AuthConfig) -> Result<TokenIssuer, ServerError> {
    if section.jwt_secret.is_empty() {
        return Err(ConfigError::validation_error(
            "auth.jwt_secret must be set when auth is enabled",
        )
        .into());
    }
    Ok(TokenIssuer::new(section.jwt_secret.as_bytes())?
        .with_token_lifetime(Duration::from_secs(section.token_lifetime_secs))
        .with_refresh_lifetime(Duration::from_secs(section.refresh_lifetime_secs)))
}

fn auth_stages(
    mut builder: PipelineBuilder,
    section: &AuthConfig,
    issuer: &Arc<TokenIssuer>,
    sink: &SecuritySink,
) -> PipelineBuilder {
    let gate = match &section.public_routes {
        Some(routes) => PublicRouteGate::new(routes.iter().cloned()),
        None => PublicRouteGate::default(),
    };
    builder = builder
        .stage(Stage::PublicRoutes, gate)
        .stage(
            Stage::Auth,
            AuthMiddleware::new(Arc::clone(issuer)).with_sink(sink.clone()),
        );
    if !section.admin_prefixes.is_empty() {
        builder = builder.stage(
            Stage::AdminGuard,
            AdminGuard::for_prefixes(section.admin_prefixes.iter().cloned())
                .with_sink(sink.clone()),
        );
    }
    builder
}

fn validation(section: &ValidationSection) -> ValidationConfig {
    let defaults = ValidationConfig::default();
    ValidationConfig {
        max_request_bytes: section.max_request_bytes,
        allowed_content_types: section
            .allowed_content_types
            .clone()
            .unwrap_or(defaults.allowed_content_types),
        blocked_user_agents: section
            .blocked_user_agents
            .clone()
            .unwrap_or(defaults.blocked_user_agents),
        blocked_ips: section.blocked_ips.clone(),
        enable_security_checks: section.enable_security_checks,
        enable_response_validation: section.enable_response_validation,
        suspicious_paths: defaults.suspicious_paths,
        sql_injection_patterns: defaults.sql_injection_patterns,
        xss_patterns: defaults.xss_patterns,
    }
}

fn rate_limit_store(section: &RateLimitSection) -> Result<Arc<dyn RateLimitStore>, ServerError> {
    match section.store {
        RateLimitStoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        RateLimitStoreKind::Redis => {
            let url = section.redis_url.as_deref().unwrap_or_default();
            let store = RedisStore::new(url)?.with_timeout(section.store_timeout());
            Ok(Arc::new(store))
        }
    }
}

fn rate_limit_stages(
    mut builder: PipelineBuilder,
    section: &RateLimitSection,
    sink: &SecuritySink,
) -> Result<PipelineBuilder, ServerError> {
    let store = rate_limit_store(section)?;

    // Group limiters run before the general one so a strict group rejects
    // without spending the general quota.
    for group in &section.groups {
        builder = builder.stage(
            Stage::RateLimit,
            RateLimitMiddleware::builder()
                .group(group.name.clone())
                .paths(group.path_prefixes.iter().cloned())
                .limit(group.requests)
                .window(Duration::from_secs(group.window_secs))
                .api_key_header(section.api_key_header.clone())
                .store(Arc::clone(&store))
                .sink(sink.clone())
                .build(),
        );
    }

    let skip_paths = section.skip_paths.clone();
    builder = builder.stage(
        Stage::RateLimit,
        RateLimitMiddleware::builder()
            .limit(section.requests)
            .window(section.window())
            .api_key_header(section.api_key_header.clone())
            .skip(move |request: &Request| {
                let path = request.uri().path();
                skip_paths.iter().any(|p| path.starts_with(p.as_str()))
            })
            .store(store)
            .sink(sink.clone())
            .build(),
    );
    Ok(builder)
}

fn cache_stages(
    mut builder: PipelineBuilder,
    section: &CacheSection,
) -> (PipelineBuilder, CacheMiddleware) {
    let mut skip_prefixes = section.skip_prefixes.clone();
    if let Some(prefix) = &section.static_prefix {
        builder = builder.stage(
            Stage::Cache,
            CacheMiddleware::static_files(
                prefix.clone(),
                Duration::from_secs(section.static_ttl_secs),
            ),
        );
        skip_prefixes.push(prefix.clone());
    }

    let cache = CacheMiddleware::new(CacheConfig {
        default_ttl: Duration::from_secs(section.default_ttl_secs),
        max_entries: section.max_entries,
        max_entry_bytes: section.max_entry_bytes,
        skip_prefixes,
        vary_headers: section.vary_headers.clone(),
        ..CacheConfig::default()
    });
    builder = builder.stage(Stage::Cache, cache.clone());
    (builder, cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use nutrition_edge_config::RateLimitGroup;

    fn config() -> EdgeConfig {
        let mut config = EdgeConfig::default();
        config.auth.jwt_secret = "unit-test-secret-0123456789abcdef".to_string();
        config
    }

    fn ok() -> BoxFuture<'static, Response> {
        Box::pin(async {
            http::Response::builder()
                .status(StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from_static(b"{}")))
                .unwrap()
        })
    }

    #[test]
    fn test_default_config_registers_every_slot() {
        let edge = Edge::from_config(&config()).unwrap();
        let mut slots = edge.pipeline().stages();
        slots.dedup();
        assert_eq!(slots, Stage::all().to_vec());
    }

    #[test]
    fn test_default_stage_order() {
        let edge = Edge::from_config(&config()).unwrap();
        assert_eq!(
            edge.pipeline().stage_names(),
            vec![
                "recover",
                "request_id",
                "request_logger",
                "slow_request_logger",
                "security_event_logger",
                "metrics_logger",
                "timeout",
                "security_headers",
                "server_header",
                "cors",
                "compression",
                "public_routes",
                "auth",
                "admin_guard",
                "validation",
                "rate_limit",
                "rate_limit",
                "cache",
            ]
        );
    }

    #[test]
    fn test_auth_requires_secret() {
        let err = Edge::from_config(&EdgeConfig::default()).unwrap_err();
        assert!(matches!(err, ServerError::Config(ConfigError::ValidationError(_))));

        let mut config = EdgeConfig::default();
        config.auth.enabled = false;
        let edge = Edge::from_config(&config).unwrap();
        assert!(edge.issuer().is_none());
        assert!(!edge.pipeline().stages().contains(&Stage::Auth));
    }

    #[test]
    fn test_disabled_sections_leave_slots_empty() {
        let mut config = config();
        config.cors.enabled = false;
        config.compression.enabled = false;
        config.cache.enabled = false;
        config.rate_limit.enabled = false;
        config.logging.enabled = false;

        let edge = Edge::from_config(&config).unwrap();
        let stages = edge.pipeline().stages();
        for slot in [Stage::Cors, Stage::Compression, Stage::Cache, Stage::RateLimit, Stage::Logging] {
            assert!(!stages.contains(&slot), "{slot:?} should be absent");
        }
        assert!(edge.cache_stats().is_none());
    }

    #[test]
    fn test_unknown_cors_method_is_rejected() {
        let mut config = config();
        config.cors.allowed_methods = vec!["GET".to_string(), "NOT A METHOD".to_string()];
        let err = Edge::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            ServerError::Config(ConfigError::InvalidValue { field, .. }) if field == "cors.allowed_methods"
        ));
    }

    #[test]
    fn test_invalid_redis_url_is_rejected() {
        let mut config = config();
        config.rate_limit.store = RateLimitStoreKind::Redis;
        config.rate_limit.redis_url = Some("not a url".to_string());
        assert!(matches!(Edge::from_config(&config), Err(ServerError::Store(_))));
    }

    #[test]
    fn test_static_prefix_adds_a_cache_stage() {
        let mut config = config();
        config.cache.static_prefix = Some("/static/".to_string());
        let edge = Edge::from_config(&config).unwrap();
        let caches = edge
            .pipeline()
            .stages()
            .into_iter()
            .filter(|s| *s == Stage::Cache)
            .count();
        assert_eq!(caches, 2);
    }

    #[test]
    fn test_custom_profile_sets_only_custom_headers() {
        let mut config = config();
        config.security_headers.profile = HeadersProfile::Custom;
        config
            .security_headers
            .custom
            .insert("X-Edge".to_string(), "on".to_string());

        let edge = Edge::from_config(&config).unwrap();
        let response = tokio_test::block_on(edge.handle(
            http::Request::builder()
                .uri("/health")
                .body(Full::new(Bytes::new()))
                .unwrap(),
            |_ctx, _req| ok(),
        ));

        assert_eq!(response.headers()["x-edge"], "on");
        assert!(response.headers().get("x-frame-options").is_none());
    }

    #[tokio::test]
    async fn test_group_limiter_applies_to_its_paths_only() {
        let mut config = config();
        config.rate_limit.groups = vec![RateLimitGroup {
            name: "search".to_string(),
            path_prefixes: vec!["/api/v1/public/search".to_string()],
            requests: 1,
            window_secs: 60,
        }];
        let edge = Edge::from_config(&config).unwrap();

        let request = |path: &str| {
            http::Request::builder()
                .uri(path)
                .header("x-forwarded-for", "198.51.100.4")
                .body(Full::new(Bytes::new()))
                .unwrap()
        };

        let first = edge.handle(request("/api/v1/public/search"), |_c, _r| ok()).await;
        assert_eq!(first.status(), StatusCode::OK);
        let second = edge.handle(request("/api/v1/public/search"), |_c, _r| ok()).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = edge.handle(request("/api/v1/public/recipes"), |_c, _r| ok()).await;
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_request_id() {
        let edge = Edge::from_config(&config()).unwrap();
        let request = http::Request::builder()
            .uri("/health")
            .header("x-request-id", "corr-1")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = edge
            .handle(request, |_c, _r| -> BoxFuture<'static, Response> {
                panic!("handler exploded")
            })
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["x-request-id"], "corr-1");
    }
}
