//! Compression middleware.
//!
//! Gzip-encodes response bodies for clients that accept it. Negotiation
//! honours quality values (`gzip;q=0` disables it), already-compressed
//! content types are left alone, and the encoded body is kept only when it is
//! actually smaller.
//!
//! When a body is encoded the stage sets `Content-Encoding: gzip` and drops
//! any precomputed `Content-Length`. `Vary: Accept-Encoding` is added to every
//! response so shared caches key on the negotiated encoding.
//!
//! ## Example
//!
//! ```
//! use nutrition_edge_middleware::stages::CompressionMiddleware;
//!
//! let compression = CompressionMiddleware::builder()
//!     .level(6)
//!     .min_size(512)
//!     .build();
//! assert_eq!(compression.level(), 6);
//! ```

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{collect_body, Request, Response};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;
use std::collections::HashSet;
use std::io::Write;

/// Default gzip level.
pub const DEFAULT_LEVEL: u32 = 5;

/// Compression middleware configuration.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Gzip level, 1 (fastest) to 9 (smallest).
    level: u32,
    /// Minimum response size to compress (in bytes).
    min_size: usize,
    /// Content types to never compress.
    excluded_types: HashSet<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            min_size: 1024,
            excluded_types: Self::default_excluded_types(),
        }
    }
}

impl CompressionConfig {
    /// Content types that are already compressed.
    fn default_excluded_types() -> HashSet<String> {
        [
            "application/gzip",
            "application/x-gzip",
            "application/zip",
            "application/x-rar-compressed",
            "application/x-7z-compressed",
            "application/x-bzip2",
            "application/pdf",
            "image/jpeg",
            "image/png",
            "image/gif",
            "image/webp",
            "image/avif",
            "audio/mpeg",
            "audio/ogg",
            "video/mp4",
            "video/webm",
            "font/woff",
            "font/woff2",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
    }
}

/// Compression middleware.
#[derive(Debug, Clone, Default)]
pub struct CompressionMiddleware {
    config: CompressionConfig,
}

impl CompressionMiddleware {
    /// Creates a new compression middleware with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> CompressionBuilder {
        CompressionBuilder::new()
    }

    /// Returns the gzip level.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.config.level
    }

    /// Returns `true` if the `Accept-Encoding` value admits gzip.
    ///
    /// An explicit `gzip` entry decides; otherwise a `*` entry does.
    fn accepts_gzip(accept_encoding: &str) -> bool {
        let mut wildcard = None;
        for part in accept_encoding.split(',') {
            let mut pieces = part.split(';');
            let coding = pieces.next().unwrap_or("").trim().to_ascii_lowercase();

            let mut quality = 1.0_f32;
            for param in pieces {
                if let Some(q) = param.trim().strip_prefix("q=") {
                    if let Ok(q) = q.trim().parse::<f32>() {
                        quality = q.clamp(0.0, 1.0);
                    }
                }
            }

            match coding.as_str() {
                "gzip" | "x-gzip" => return quality > 0.0,
                "*" => wildcard = Some(quality > 0.0),
                _ => {}
            }
        }
        wildcard.unwrap_or(false)
    }

    fn should_compress_content_type(&self, content_type: &str) -> bool {
        let base_type = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        !self.config.excluded_types.contains(&base_type)
    }

    fn gzip(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), GzCompression::new(self.config.level));
        encoder.write_all(data)?;
        encoder.finish()
    }
}

impl Middleware for CompressionMiddleware {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let wants_gzip = request
                .headers()
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .is_some_and(Self::accepts_gzip);

            let mut response = next.run(ctx, request).await;

            response
                .headers_mut()
                .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));

            let should_compress = wants_gzip
                && !matches!(
                    response.status(),
                    StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED
                )
                && !response.headers().contains_key(header::CONTENT_ENCODING)
                && response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map_or(true, |ct| self.should_compress_content_type(ct));

            if !should_compress {
                return response;
            }

            let (mut parts, body) = response.into_parts();
            let body_bytes = collect_body(body).await;

            if body_bytes.len() < self.config.min_size {
                return Response::from_parts(parts, Full::new(body_bytes));
            }

            let compressed = match self.gzip(&body_bytes) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(request_id = %ctx.request_id(), error = %e, "Gzip encoding failed; sending identity");
                    return Response::from_parts(parts, Full::new(body_bytes));
                }
            };

            if compressed.len() >= body_bytes.len() {
                return Response::from_parts(parts, Full::new(body_bytes));
            }

            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);

            Response::from_parts(parts, Full::new(Bytes::from(compressed)))
        })
    }
}

/// Builder for compression middleware configuration.
#[derive(Debug, Clone, Default)]
pub struct CompressionBuilder {
    config: CompressionConfig,
}

impl CompressionBuilder {
    /// Creates a new compression builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gzip level, clamped to 1..=9.
    ///
    /// Default: 5
    #[must_use]
    pub fn level(mut self, level: u32) -> Self {
        self.config.level = level.clamp(1, 9);
        self
    }

    /// Sets the minimum response size to compress (in bytes).
    ///
    /// Default: 1024
    #[must_use]
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.config.min_size = min_size;
        self
    }

    /// Adds a content type to the exclusion list.
    #[must_use]
    pub fn exclude_type(mut self, content_type: impl Into<String>) -> Self {
        self.config
            .excluded_types
            .insert(content_type.into().to_ascii_lowercase());
        self
    }

    /// Builds the compression middleware.
    #[must_use]
    pub fn build(self) -> CompressionMiddleware {
        CompressionMiddleware {
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use http::Request as HttpRequest;
    use std::io::Read;

    fn request(accept_encoding: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri("/api/v1/recipes");
        if let Some(ae) = accept_encoding {
            builder = builder.header(header::ACCEPT_ENCODING, ae);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn handler<'a>(content_type: &'static str, body: Vec<u8>) -> Next<'a> {
        Next::handler(move |_ctx, _req| {
            Box::pin(async move {
                http::Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, body.len())
                    .body(Full::new(Bytes::from(body)))
                    .unwrap()
            })
        })
    }

    fn json_body() -> Vec<u8> {
        serde_json::to_vec(&vec![serde_json::json!({"name": "oatmeal", "kcal": 150}); 200]).unwrap()
    }

    #[test]
    fn test_accepts_gzip() {
        assert!(CompressionMiddleware::accepts_gzip("gzip"));
        assert!(CompressionMiddleware::accepts_gzip("br, gzip;q=0.5"));
        assert!(CompressionMiddleware::accepts_gzip("*"));
        assert!(!CompressionMiddleware::accepts_gzip("gzip;q=0"));
        assert!(!CompressionMiddleware::accepts_gzip("gzip;q=0, *"));
        assert!(!CompressionMiddleware::accepts_gzip("br, deflate"));
        assert!(!CompressionMiddleware::accepts_gzip(""));
    }

    #[tokio::test]
    async fn test_compresses_json() {
        let mw = CompressionMiddleware::new();
        let mut ctx = MiddlewareContext::new();
        let original = json_body();

        let response = mw
            .process(&mut ctx, request(Some("gzip, deflate")), handler("application/json", original.clone()))
            .await;

        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        assert_eq!(response.headers()[header::VARY], "Accept-Encoding");
        assert!(!response.headers().contains_key(header::CONTENT_LENGTH));

        let body = collect_body(response.into_body()).await;
        assert!(body.len() < original.len());
        let mut decoded = Vec::new();
        GzDecoder::new(&body[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_no_accept_encoding_passes_through() {
        let mw = CompressionMiddleware::new();
        let mut ctx = MiddlewareContext::new();
        let response = mw
            .process(&mut ctx, request(None), handler("application/json", json_body()))
            .await;

        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
        assert_eq!(response.headers()[header::VARY], "Accept-Encoding");
        assert!(response.headers().contains_key(header::CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn test_skips_already_compressed_types() {
        let mw = CompressionMiddleware::new();
        let mut ctx = MiddlewareContext::new();
        let response = mw
            .process(&mut ctx, request(Some("gzip")), handler("image/png", vec![7_u8; 4096]))
            .await;
        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
    }

    #[tokio::test]
    async fn test_skips_small_bodies() {
        let mw = CompressionMiddleware::new();
        let mut ctx = MiddlewareContext::new();
        let response = mw
            .process(&mut ctx, request(Some("gzip")), handler("application/json", b"{\"ok\":true}".to_vec()))
            .await;
        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
        assert_eq!(&collect_body(response.into_body()).await[..], b"{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_keeps_identity_when_not_smaller() {
        // Random-looking bytes do not compress.
        let noise: Vec<u8> = (0..4096_u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        let mw = CompressionMiddleware::builder().min_size(0).level(1).build();
        let mut ctx = MiddlewareContext::new();
        let response = mw
            .process(&mut ctx, request(Some("gzip")), handler("application/octet-stream", noise.clone()))
            .await;

        if response.headers().contains_key(header::CONTENT_ENCODING) {
            let body = collect_body(response.into_body()).await;
            assert!(body.len() < noise.len());
        } else {
            assert_eq!(collect_body(response.into_body()).await.to_vec(), noise);
        }
    }

    #[test]
    fn test_level_is_clamped() {
        assert_eq!(CompressionMiddleware::builder().level(0).build().level(), 1);
        assert_eq!(CompressionMiddleware::builder().level(42).build().level(), 9);
        assert_eq!(CompressionMiddleware::new().level(), DEFAULT_LEVEL);
    }
}
