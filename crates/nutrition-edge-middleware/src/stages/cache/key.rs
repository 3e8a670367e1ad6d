//! Cache key derivation.

use crate::types::Request;
use md5::{Digest, Md5};
use std::fmt;
use std::sync::Arc;

/// Derives the cache key of a request.
#[derive(Clone, Default)]
pub enum CacheKeyer {
    /// MD5 over method, path, raw query and the configured vary headers.
    #[default]
    Fingerprint,
    /// The request path alone.
    Path,
    /// Custom function.
    Custom(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl fmt::Debug for CacheKeyer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fingerprint => write!(f, "CacheKeyer::Fingerprint"),
            Self::Path => write!(f, "CacheKeyer::Path"),
            Self::Custom(_) => write!(f, "CacheKeyer::Custom(<fn>)"),
        }
    }
}

impl CacheKeyer {
    /// Computes the key of `request`.
    #[must_use]
    pub fn key(&self, request: &Request, vary_headers: &[String]) -> String {
        match self {
            Self::Fingerprint => fingerprint(request, vary_headers),
            Self::Path => request.uri().path().to_string(),
            Self::Custom(f) => f(request),
        }
    }
}

/// Hex MD5 of `method`, path, raw query and each `(name, value)` of
/// `vary_headers`. Absent headers contribute an empty value.
#[must_use]
pub fn fingerprint(request: &Request, vary_headers: &[String]) -> String {
    let mut hasher = Md5::new();
    hasher.update(request.method().as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.uri().path().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.uri().query().unwrap_or("").as_bytes());

    for name in vary_headers {
        let value = request
            .headers()
            .get(name.as_str())
            .map(http::HeaderValue::as_bytes)
            .unwrap_or_default();
        hasher.update(b"\n");
        hasher.update(name.to_ascii_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update(value);
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    fn request(uri: &str, auth: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[test]
    fn test_fingerprint_is_fixed_width_hex() {
        let key = fingerprint(&request("/api/v1/diseases", None), &[]);
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_query_changes_key() {
        let a = fingerprint(&request("/api/v1/foods?page=1", None), &[]);
        let b = fingerprint(&request("/api/v1/foods?page=2", None), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_vary_headers_partition_keys() {
        let vary = vec!["Authorization".to_string()];
        let alice = fingerprint(&request("/api/v1/meals", Some("Bearer a")), &vary);
        let bob = fingerprint(&request("/api/v1/meals", Some("Bearer b")), &vary);
        assert_ne!(alice, bob);

        let unvaried_alice = fingerprint(&request("/api/v1/meals", Some("Bearer a")), &[]);
        let unvaried_bob = fingerprint(&request("/api/v1/meals", Some("Bearer b")), &[]);
        assert_eq!(unvaried_alice, unvaried_bob);
    }

    #[test]
    fn test_path_keyer_ignores_query() {
        let keyer = CacheKeyer::Path;
        assert_eq!(keyer.key(&request("/static/app.js?v=3", None), &[]), "/static/app.js");
    }
}
