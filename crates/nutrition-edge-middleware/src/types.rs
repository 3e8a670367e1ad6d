//! Common types used throughout the middleware pipeline.
//!
//! Requests and responses carry fully buffered bodies. The server adapter
//! collects the incoming body before the pipeline runs, and stages that need
//! the response bytes (cache, compression, logger) collect them with
//! [`collect_body`].

use bytes::Bytes;
use http::header;
use http_body_util::Full;
use nutrition_edge_core::{EdgeError, ErrorKind};
use std::net::{IpAddr, SocketAddr};

/// The HTTP request type used in the middleware pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Header names the pipeline reads or writes.
pub mod headers {
    /// Correlation id.
    pub const X_REQUEST_ID: &str = "x-request-id";
    /// API key used for rate-limit identity.
    pub const X_API_KEY: &str = "x-api-key";
    /// First entry is the original client.
    pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
    /// Client IP set by a trusted proxy.
    pub const X_REAL_IP: &str = "x-real-ip";
    /// Quota for the window.
    pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
    /// Requests left in the window.
    pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
    /// Window reset, seconds since epoch.
    pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
    /// `HIT` or `MISS`.
    pub const X_CACHE: &str = "x-cache";
    /// Expiry of the cached entry (RFC 1123).
    pub const X_CACHE_EXPIRES: &str = "x-cache-expires";
    /// Set by the validator when response validation is enabled.
    pub const X_VALIDATION_STATUS: &str = "x-validation-status";
    /// RFC 3339 time of validation.
    pub const X_VALIDATION_TIMESTAMP: &str = "x-validation-timestamp";
}

/// Peer address of the connection, inserted into request extensions by the
/// server adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Resolves the client IP of a request.
///
/// Order: first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
/// connection's peer address.
#[must_use]
pub fn client_ip(request: &Request) -> Option<String> {
    let forwarded = request
        .headers()
        .get(headers::X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = request
        .headers()
        .get(headers::X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    request
        .extensions()
        .get::<ClientAddr>()
        .map(|addr| addr.0.ip())
        .map(|ip: IpAddr| ip.to_string())
}

/// Returns a header value as `&str`, or `None` if absent or not visible ASCII.
#[must_use]
pub fn header_str<'a>(headers: &'a http::HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Collects a buffered body into bytes.
pub async fn collect_body(body: Full<Bytes>) -> Bytes {
    match http_body_util::BodyExt::collect(body).await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

/// Renders an [`EdgeError`] as a response.
///
/// `not_modified` is an outcome rather than a failure and renders as a bare
/// 304. Every other kind renders `{"error","message","code"}` as JSON.
#[must_use]
pub fn error_response(error: &EdgeError) -> Response {
    if error.kind() == ErrorKind::NotModified {
        return http::Response::builder()
            .status(error.status())
            .body(Full::new(Bytes::new()))
            .expect("failed to build not-modified response");
    }

    let body = serde_json::to_vec(&error.to_body()).unwrap_or_default();
    http::Response::builder()
        .status(error.status())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("failed to build error response")
}

/// Extension trait for building responses.
pub trait ResponseExt {
    /// Creates a JSON error response for the given error.
    fn from_error(error: &EdgeError) -> Response;

    /// Creates a legacy `{"error": message}` JSON response.
    fn json_error(status: http::StatusCode, message: &str) -> Response;

    /// Creates a JSON response with status 200.
    fn json(value: &serde_json::Value) -> Response;
}

impl ResponseExt for Response {
    fn from_error(error: &EdgeError) -> Response {
        error_response(error)
    }

    fn json_error(status: http::StatusCode, message: &str) -> Response {
        let body = serde_json::json!({ "error": message });

        http::Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("failed to build JSON error response")
    }

    fn json(value: &serde_json::Value) -> Response {
        http::Response::builder()
            .status(http::StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(value.to_string())))
            .expect("failed to build JSON response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn request_with(headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri("/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = error_response(&EdgeError::rate_limited());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = collect_body(response.into_body()).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "rate_limited");
        assert_eq!(json["message"], "Rate limit exceeded. Please try again later.");
        assert_eq!(json["code"], "RATE_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn test_not_modified_has_empty_body() {
        let response = error_response(&EdgeError::not_modified());
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(collect_body(response.into_body()).await.is_empty());
    }

    #[tokio::test]
    async fn test_detail_is_not_serialized() {
        let error = EdgeError::unauthorized("Invalid token").with_detail("ExpiredSignature");
        let body = collect_body(error_response(&error).into_body()).await;
        assert!(!String::from_utf8_lossy(&body).contains("ExpiredSignature"));
    }

    #[test]
    fn test_legacy_json_error() {
        let response = Response::json_error(StatusCode::BAD_REQUEST, "bad");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let request = request_with(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&request).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip() {
        let request = request_with(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&request).as_deref(), Some("198.51.100.2"));
    }

    #[test]
    fn test_client_ip_from_peer_address() {
        let mut request = request_with(&[]);
        request
            .extensions_mut()
            .insert(ClientAddr("192.0.2.1:5555".parse().unwrap()));
        assert_eq!(client_ip(&request).as_deref(), Some("192.0.2.1"));
        assert_eq!(client_ip(&request_with(&[])), None);
    }
}
