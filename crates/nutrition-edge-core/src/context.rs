//! Request correlation identifier.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest client-supplied request id that is accepted verbatim.
const MAX_REQUEST_ID_LEN: usize = 128;

/// A unique identifier for each request.
///
/// Generated ids are UUID v7 strings, which are time-ordered and sort well in
/// logs. Ids supplied by clients through `X-Request-Id` are kept as opaque
/// strings when they are printable ASCII and reasonably short.
///
/// # Example
///
/// ```
/// use nutrition_edge_core::RequestId;
///
/// let generated = RequestId::new();
/// assert_eq!(generated.as_str().len(), 36);
///
/// let supplied = RequestId::parse("client-abc-123").unwrap();
/// assert_eq!(supplied.as_str(), "client-abc-123");
/// assert!(RequestId::parse("").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Accepts a client-supplied id if it is non-empty, at most 128 bytes and
    /// made of visible ASCII characters.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty()
            || value.len() > MAX_REQUEST_ID_LEN
            || !value.bytes().all(|b| b.is_ascii_graphic())
        {
            return None;
        }
        Some(Self(value.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_generated_id_is_uuid() {
        let id = RequestId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_parse_rejects_control_characters() {
        assert!(RequestId::parse("abc\ndef").is_none());
        assert!(RequestId::parse("has space").is_none());
    }

    #[test]
    fn test_parse_rejects_long_values() {
        let long = "a".repeat(MAX_REQUEST_ID_LEN + 1);
        assert!(RequestId::parse(&long).is_none());
        let max = "a".repeat(MAX_REQUEST_ID_LEN);
        assert!(RequestId::parse(&max).is_some());
    }

    #[test]
    fn test_parse_trims() {
        let id = RequestId::parse("  req-1 ").unwrap();
        assert_eq!(id.as_str(), "req-1");
    }

    #[test]
    fn test_serializes_as_string() {
        let id = RequestId::parse("req-42").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"req-42\"");
    }
}
