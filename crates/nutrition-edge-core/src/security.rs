//! Security events emitted by the validator, auth and rate-limit stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a security event.
///
/// Shape errors (size, content type) are `Warning`; pattern hits and blocked
/// callers are `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Suspicious but low impact. Accepts `medium` when deserializing.
    #[serde(alias = "medium")]
    Warning,
    /// Likely attack.
    High,
    /// Confirmed attack or breach.
    Critical,
}

impl Severity {
    /// Returns the lowercase name of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A security-relevant occurrence with a snapshot of its request.
///
/// # Example
///
/// ```
/// use nutrition_edge_core::{SecurityEvent, Severity};
///
/// let event = SecurityEvent::new("security_check_failed", Severity::High, "Suspicious URL pattern detected")
///     .with_request("GET", "/api/v1/search", Some("10.0.0.1"), None)
///     .with_detail("pattern", "union select");
///
/// assert_eq!(event.details["pattern"], "union select");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Event type, e.g. `security_check_failed`, `authentication_failure`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Severity of the event.
    pub severity: Severity,
    /// Short description.
    pub message: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the request that triggered the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// HTTP method of the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Remote IP of the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// User agent of the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Authenticated user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form details.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl SecurityEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            request_id: None,
            method: None,
            path: None,
            ip_address: None,
            user_agent: None,
            user_id: None,
            details: BTreeMap::new(),
        }
    }

    /// Attaches the request snapshot.
    #[must_use]
    pub fn with_request(
        mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        self.method = Some(method.into());
        self.path = Some(path.into());
        self.ip_address = ip_address.map(ToString::to_string);
        self.user_agent = user_agent.map(ToString::to_string);
        self
    }

    /// Attaches the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attaches the authenticated user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(ToString::to_string);
        self
    }

    /// Adds a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
