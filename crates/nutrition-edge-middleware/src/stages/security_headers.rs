//! Security headers.
//!
//! Stamps hardening headers on every response according to a profile. The
//! stage itself is profile-agnostic: a [`SecurityHeadersConfig`] is a plain
//! bundle of header values, and the presets below are just constructors.
//!
//! | Profile | CSP | HSTS | Frame | Extra |
//! |---------|-----|------|-------|-------|
//! | default | moderate | 1 year, subdomains | DENY | COEP/COOP/CORP |
//! | production(domain) | strict, domain `connect-src` | 2 years, preload | DENY | |
//! | development | lenient | off | SAMEORIGIN | no COEP |
//! | api | none | 1 year, subdomains | DENY | `X-API-Version`, `Cache-Control: no-store` |
//! | health | none | off | none | no-cache headers |
//!
//! Headers are only written when the handler did not set them, so applying
//! the stage twice yields the same header set as applying it once.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use http::header::{self, HeaderName};
use http::HeaderValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Permissions-Policy value shared by the browser-facing profiles.
const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), interest-cohort=()";

/// Strict-Transport-Security settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HstsConfig {
    /// `max-age` in seconds.
    pub max_age: u64,
    /// Adds `includeSubDomains`.
    pub include_subdomains: bool,
    /// Adds `preload`.
    pub preload: bool,
}

impl HstsConfig {
    /// Renders the header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        let mut value = format!("max-age={}", self.max_age);
        if self.include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.preload {
            value.push_str("; preload");
        }
        value
    }
}

impl Default for HstsConfig {
    fn default() -> Self {
        Self {
            max_age: 31_536_000,
            include_subdomains: true,
            preload: false,
        }
    }
}

/// A bundle of security header values. `None` means the header is not sent.
#[derive(Clone)]
pub struct SecurityHeadersConfig {
    /// Sends `X-Content-Type-Options: nosniff`.
    pub content_type_nosniff: bool,
    /// `X-Frame-Options` (`DENY` or `SAMEORIGIN`).
    pub frame_options: Option<String>,
    /// `X-XSS-Protection`.
    pub xss_protection: Option<String>,
    /// `Content-Security-Policy`.
    pub content_security_policy: Option<String>,
    /// `Referrer-Policy`.
    pub referrer_policy: Option<String>,
    /// `Strict-Transport-Security`.
    pub hsts: Option<HstsConfig>,
    /// `Permissions-Policy`.
    pub permissions_policy: Option<String>,
    /// `Cross-Origin-Embedder-Policy`.
    pub cross_origin_embedder_policy: Option<String>,
    /// `Cross-Origin-Opener-Policy`.
    pub cross_origin_opener_policy: Option<String>,
    /// `Cross-Origin-Resource-Policy`.
    pub cross_origin_resource_policy: Option<String>,
    /// Arbitrary extra headers.
    pub custom_headers: BTreeMap<String, String>,
    /// Predicate to skip the stage for certain requests.
    pub skipper: Option<Arc<dyn Fn(&Request) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for SecurityHeadersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityHeadersConfig")
            .field("content_type_nosniff", &self.content_type_nosniff)
            .field("frame_options", &self.frame_options)
            .field("xss_protection", &self.xss_protection)
            .field("content_security_policy", &self.content_security_policy)
            .field("referrer_policy", &self.referrer_policy)
            .field("hsts", &self.hsts)
            .field("permissions_policy", &self.permissions_policy)
            .field("cross_origin_embedder_policy", &self.cross_origin_embedder_policy)
            .field("cross_origin_opener_policy", &self.cross_origin_opener_policy)
            .field("cross_origin_resource_policy", &self.cross_origin_resource_policy)
            .field("custom_headers", &self.custom_headers)
            .field("skipper", &self.skipper.is_some())
            .finish()
    }
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            content_type_nosniff: true,
            frame_options: Some("DENY".to_string()),
            xss_protection: Some("1; mode=block".to_string()),
            content_security_policy: Some(
                [
                    "default-src 'self'",
                    "script-src 'self' 'unsafe-inline' 'unsafe-eval' https://cdn.jsdelivr.net",
                    "style-src 'self' 'unsafe-inline' https://fonts.googleapis.com",
                    "font-src 'self' https://fonts.gstatic.com",
                    "img-src 'self' data: https:",
                    "connect-src 'self' https://api.* wss://api.*",
                    "frame-ancestors 'none'",
                    "base-uri 'self'",
                    "form-action 'self'",
                ]
                .join("; "),
            ),
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
            hsts: Some(HstsConfig::default()),
            permissions_policy: Some(PERMISSIONS_POLICY.to_string()),
            cross_origin_embedder_policy: Some("require-corp".to_string()),
            cross_origin_opener_policy: Some("same-origin".to_string()),
            cross_origin_resource_policy: Some("cross-origin".to_string()),
            custom_headers: BTreeMap::new(),
            skipper: None,
        }
    }
}

impl SecurityHeadersConfig {
    /// Strict CSP scoped to `api.<domain>`, two-year HSTS with preload.
    #[must_use]
    pub fn production(domain: &str) -> Self {
        Self {
            content_security_policy: Some(
                [
                    "default-src 'self'".to_string(),
                    "script-src 'self'".to_string(),
                    "style-src 'self' https://fonts.googleapis.com".to_string(),
                    "font-src 'self' https://fonts.gstatic.com".to_string(),
                    "img-src 'self' data: https:".to_string(),
                    format!("connect-src 'self' https://api.{domain} wss://api.{domain}"),
                    "frame-ancestors 'none'".to_string(),
                    "base-uri 'self'".to_string(),
                    "form-action 'self'".to_string(),
                    "upgrade-insecure-requests".to_string(),
                ]
                .join("; "),
            ),
            hsts: Some(HstsConfig {
                max_age: 63_072_000,
                include_subdomains: true,
                preload: true,
            }),
            ..Self::default()
        }
    }

    /// Lenient CSP, no HSTS, same-origin framing.
    #[must_use]
    pub fn development() -> Self {
        Self {
            content_security_policy: Some(
                [
                    "default-src 'self'",
                    "script-src 'self' 'unsafe-inline' 'unsafe-eval' https://cdn.jsdelivr.net",
                    "style-src 'self' 'unsafe-inline' https://fonts.googleapis.com",
                    "font-src 'self' https://fonts.gstatic.com",
                    "img-src 'self' data: https: http:",
                    "connect-src 'self' https: http: ws: wss:",
                    "frame-ancestors 'self'",
                    "base-uri 'self'",
                    "form-action 'self'",
                ]
                .join("; "),
            ),
            hsts: None,
            frame_options: Some("SAMEORIGIN".to_string()),
            cross_origin_embedder_policy: None,
            ..Self::default()
        }
    }

    /// For JSON endpoints: no CSP, responses marked uncacheable by clients.
    #[must_use]
    pub fn api() -> Self {
        let mut custom_headers = BTreeMap::new();
        custom_headers.insert("X-API-Version".to_string(), "1.0".to_string());
        custom_headers.insert(
            "Cache-Control".to_string(),
            "no-store, no-cache, must-revalidate, private".to_string(),
        );
        Self {
            content_type_nosniff: true,
            frame_options: Some("DENY".to_string()),
            xss_protection: Some("1; mode=block".to_string()),
            content_security_policy: None,
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
            hsts: Some(HstsConfig::default()),
            permissions_policy: None,
            cross_origin_embedder_policy: None,
            cross_origin_opener_policy: None,
            cross_origin_resource_policy: Some("cross-origin".to_string()),
            custom_headers,
            skipper: None,
        }
    }

    /// Minimal headers for health probes.
    #[must_use]
    pub fn health() -> Self {
        let mut custom_headers = BTreeMap::new();
        custom_headers.insert(
            "Cache-Control".to_string(),
            "no-cache, no-store, must-revalidate".to_string(),
        );
        custom_headers.insert("Pragma".to_string(), "no-cache".to_string());
        custom_headers.insert("Expires".to_string(), "0".to_string());
        Self {
            content_type_nosniff: true,
            frame_options: None,
            xss_protection: None,
            content_security_policy: None,
            referrer_policy: None,
            hsts: None,
            permissions_policy: None,
            cross_origin_embedder_policy: None,
            cross_origin_opener_policy: None,
            cross_origin_resource_policy: None,
            custom_headers,
            skipper: None,
        }
    }

    /// The default profile plus extra headers.
    #[must_use]
    pub fn custom(headers: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            custom_headers: headers.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Sets a predicate to skip the stage.
    #[must_use]
    pub fn skip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skipper = Some(Arc::new(f));
        self
    }

    /// Resolves the configured values into header pairs, dropping any that
    /// are not valid header names or values.
    fn resolve(&self) -> Vec<(HeaderName, HeaderValue)> {
        let mut pairs: Vec<(HeaderName, Option<String>)> = vec![
            (
                header::X_CONTENT_TYPE_OPTIONS,
                self.content_type_nosniff.then(|| "nosniff".to_string()),
            ),
            (header::X_FRAME_OPTIONS, self.frame_options.clone()),
            (header::X_XSS_PROTECTION, self.xss_protection.clone()),
            (
                header::CONTENT_SECURITY_POLICY,
                self.content_security_policy.clone(),
            ),
            (header::REFERRER_POLICY, self.referrer_policy.clone()),
            (
                header::STRICT_TRANSPORT_SECURITY,
                self.hsts.map(|h| h.header_value()),
            ),
            (
                HeaderName::from_static("permissions-policy"),
                self.permissions_policy.clone(),
            ),
            (
                HeaderName::from_static("cross-origin-embedder-policy"),
                self.cross_origin_embedder_policy.clone(),
            ),
            (
                HeaderName::from_static("cross-origin-opener-policy"),
                self.cross_origin_opener_policy.clone(),
            ),
            (
                HeaderName::from_static("cross-origin-resource-policy"),
                self.cross_origin_resource_policy.clone(),
            ),
        ];

        for (name, value) in &self.custom_headers {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => pairs.push((name, Some(value.clone()))),
                Err(_) => tracing::warn!(header = %name, "Ignoring invalid custom header name"),
            }
        }

        pairs
            .into_iter()
            .filter_map(|(name, value)| {
                let value = value.filter(|v| !v.is_empty())?;
                match HeaderValue::from_str(&value) {
                    Ok(value) => Some((name, value)),
                    Err(_) => {
                        tracing::warn!(header = %name, "Ignoring invalid security header value");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Middleware that stamps security headers on every response.
#[derive(Clone)]
pub struct SecurityHeadersMiddleware {
    headers: Vec<(HeaderName, HeaderValue)>,
    skipper: Option<Arc<dyn Fn(&Request) -> bool + Send + Sync>>,
}

impl std::fmt::Debug for SecurityHeadersMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityHeadersMiddleware")
            .field("headers", &self.headers)
            .field("skipper", &self.skipper.is_some())
            .finish()
    }
}

impl Default for SecurityHeadersMiddleware {
    fn default() -> Self {
        Self::new(SecurityHeadersConfig::default())
    }
}

impl SecurityHeadersMiddleware {
    /// Creates the stage from a profile.
    #[must_use]
    pub fn new(config: SecurityHeadersConfig) -> Self {
        Self {
            headers: config.resolve(),
            skipper: config.skipper,
        }
    }

    /// Writes every configured header the response does not already carry.
    pub fn apply(&self, response: &mut Response) {
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            headers.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }
}

impl Middleware for SecurityHeadersMiddleware {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if self.skipper.as_ref().is_some_and(|skip| skip(&request)) {
                return next.run(ctx, request).await;
            }

            let mut response = next.run(ctx, request).await;
            self.apply(&mut response);
            response
        })
    }
}

/// Removes the `Server` header, or replaces it with a fixed value.
#[derive(Debug, Clone, Default)]
pub struct ServerHeaderMiddleware {
    replacement: Option<HeaderValue>,
}

impl ServerHeaderMiddleware {
    /// Removes the header.
    #[must_use]
    pub fn remove() -> Self {
        Self::default()
    }

    /// Replaces the header with `value`.
    #[must_use]
    pub fn replace_with(value: &'static str) -> Self {
        Self {
            replacement: Some(HeaderValue::from_static(value)),
        }
    }
}

impl Middleware for ServerHeaderMiddleware {
    fn name(&self) -> &'static str {
        "server_header"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let mut response = next.run(ctx, request).await;
            match &self.replacement {
                Some(value) => {
                    response.headers_mut().insert(header::SERVER, value.clone());
                }
                None => {
                    response.headers_mut().remove(header::SERVER);
                }
            }
            response
        })
    }
}
