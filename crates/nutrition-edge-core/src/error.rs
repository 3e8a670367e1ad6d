//! Error types for the edge pipeline.
//!
//! Every stage converts its anomalies into an [`EdgeError`] whose [`ErrorKind`]
//! is drawn from a closed enumeration. The outer frame of the pipeline maps the
//! kind to a status code and a JSON body:
//!
//! ```json
//! {"error": "rate_limited", "message": "Rate limit exceeded. Please try again later.", "code": "RATE_LIMIT_EXCEEDED"}
//! ```
//!
//! | Kind | Status | Code |
//! |---|---|---|
//! | `unauthorized` | 401 | `UNAUTHORIZED` |
//! | `forbidden` | 403 | `FORBIDDEN` |
//! | `invalid_input` | 400 | `INVALID_INPUT` |
//! | `invalid_format` | 415 | `INVALID_FORMAT` |
//! | `payload_too_large` | 413 | `PAYLOAD_TOO_LARGE` |
//! | `security_violation` | 422 | `SECURITY_VIOLATION` |
//! | `rate_limited` | 429 | `RATE_LIMIT_EXCEEDED` |
//! | `not_modified` | 304 | `NOT_MODIFIED` |
//! | `timeout` | 408 | `TIMEOUT` |
//! | `upstream_unavailable` | 503 | `SERVICE_UNAVAILABLE` |
//! | `internal` | 500 | `INTERNAL_SERVER_ERROR` |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`EdgeError`].
pub type EdgeResult<T> = Result<T, EdgeError>;

/// The closed set of error kinds produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing, invalid or expired credentials.
    Unauthorized,
    /// Admin gate or blocked caller.
    Forbidden,
    /// Shape errors detected before the validator engages.
    InvalidInput,
    /// Content type mismatch.
    InvalidFormat,
    /// Request body over the configured size cap.
    PayloadTooLarge,
    /// Pattern hit or blocked agent/IP.
    SecurityViolation,
    /// Quota exceeded.
    RateLimited,
    /// Successful conditional request. An outcome, not a failure.
    NotModified,
    /// Deadline elapsed or request cancelled.
    Timeout,
    /// Remote store failure. The rate limiter fails open on this kind.
    UpstreamUnavailable,
    /// Recovered panic or unclassified failure.
    Internal,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Unauthorized,
        Self::Forbidden,
        Self::InvalidInput,
        Self::InvalidFormat,
        Self::PayloadTooLarge,
        Self::SecurityViolation,
        Self::RateLimited,
        Self::NotModified,
        Self::Timeout,
        Self::UpstreamUnavailable,
        Self::Internal,
    ];

    /// Returns the wire name of this kind (the `error` field of the body).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InvalidInput => "invalid_input",
            Self::InvalidFormat => "invalid_format",
            Self::PayloadTooLarge => "payload_too_large",
            Self::SecurityViolation => "security_violation",
            Self::RateLimited => "rate_limited",
            Self::NotModified => "not_modified",
            Self::Timeout => "timeout",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Internal => "internal",
        }
    }

    /// Returns the symbolic code (the `code` field of the body).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidInput => "INVALID_INPUT",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::RateLimited => "RATE_LIMIT_EXCEEDED",
            Self::NotModified => "NOT_MODIFIED",
            Self::Timeout => "TIMEOUT",
            Self::UpstreamUnavailable => "SERVICE_UNAVAILABLE",
            Self::Internal => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Returns the default HTTP status code for this kind.
    #[must_use]
    pub const fn default_status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::InvalidFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SecurityViolation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotModified => StatusCode::NOT_MODIFIED,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline error: `{kind, user_message, detail}`.
///
/// The `message` is safe to show to clients. The `detail` carries internal
/// context and only ever reaches the logs.
///
/// # Example
///
/// ```
/// use nutrition_edge_core::{EdgeError, ErrorKind};
///
/// let err = EdgeError::unauthorized("Invalid token").with_detail("signature mismatch");
/// assert_eq!(err.kind(), ErrorKind::Unauthorized);
/// assert_eq!(err.status().as_u16(), 401);
/// assert_eq!(err.to_body().message, "Invalid token");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct EdgeError {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
    status: Option<StatusCode>,
}

impl EdgeError {
    /// Creates an error of the given kind with a user-facing message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            status: None,
        }
    }

    /// Creates an `unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Creates a `forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Creates an `invalid_input` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Creates an `invalid_format` error.
    #[must_use]
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFormat, message)
    }

    /// Creates a `payload_too_large` error.
    #[must_use]
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, message)
    }

    /// Creates a `security_violation` error.
    #[must_use]
    pub fn security_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityViolation, message)
    }

    /// Creates a `rate_limited` error with the standard message.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::new(
            ErrorKind::RateLimited,
            "Rate limit exceeded. Please try again later.",
        )
    }

    /// Creates a `not_modified` outcome.
    #[must_use]
    pub fn not_modified() -> Self {
        Self::new(ErrorKind::NotModified, "Not modified")
    }

    /// Creates a `timeout` error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates an `upstream_unavailable` error.
    #[must_use]
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    /// Creates an `internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attaches internal detail that is logged but never serialized.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Overrides the status code derived from the kind.
    ///
    /// Used where one kind maps to several statuses, e.g. a blocked user agent
    /// is a `security_violation` answered with 403.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the user-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the internal detail, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or_else(|| self.kind.default_status())
    }

    /// Converts this error to its serializable response body.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind.as_str().to_string(),
            message: self.message.clone(),
            code: self.kind.code().to_string(),
        }
    }
}

/// JSON body of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The error kind, e.g. `rate_limited`.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Symbolic code, e.g. `RATE_LIMIT_EXCEEDED`.
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::Unauthorized.default_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.default_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::InvalidInput.default_status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorKind::InvalidFormat.default_status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ErrorKind::PayloadTooLarge.default_status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ErrorKind::SecurityViolation.default_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorKind::RateLimited.default_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::NotModified.default_status(), StatusCode::NOT_MODIFIED);
        assert_eq!(ErrorKind::Internal.default_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_every_kind_has_distinct_wire_name() {
        let names: std::collections::HashSet<_> =
            ErrorKind::ALL.iter().map(ErrorKind::as_str).collect();
        assert_eq!(names.len(), ErrorKind::ALL.len());
    }

    #[test]
    fn test_wire_name_matches_serde() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_rate_limited_body() {
        let body = EdgeError::rate_limited().to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "rate_limited");
        assert_eq!(json["message"], "Rate limit exceeded. Please try again later.");
        assert_eq!(json["code"], "RATE_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_status_override() {
        let err = EdgeError::security_violation("Blocked user agent detected")
            .with_status(StatusCode::FORBIDDEN);
        assert_eq!(err.kind(), ErrorKind::SecurityViolation);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_detail_not_in_body() {
        let err = EdgeError::unauthorized("Invalid token").with_detail("InvalidSignature");
        assert_eq!(err.detail(), Some("InvalidSignature"));
        let json = serde_json::to_string(&err.to_body()).unwrap();
        assert!(!json.contains("InvalidSignature"));
    }

    #[test]
    fn test_display() {
        let err = EdgeError::timeout("Request deadline exceeded");
        assert_eq!(err.to_string(), "timeout: Request deadline exceeded");
    }
}
