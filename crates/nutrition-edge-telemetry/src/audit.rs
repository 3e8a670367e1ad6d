//! Security audit trail.
//!
//! [`SecuritySink`] is the single place stages publish [`SecurityEvent`]s to.
//! Each event is logged, counted in Prometheus, appended to a bounded
//! [`SecurityAuditLog`] and folded into [`SecurityMetrics`].
//!
//! The audit log is a ring: once `capacity` events are held, the oldest is
//! discarded on every append. Appends take the write lock; [`snapshot`] copies
//! under the read lock so exporters never block request threads for long.
//!
//! [`snapshot`]: SecurityAuditLog::snapshot

use crate::metrics::record_security_event;
use nutrition_edge_core::{SecurityEvent, Severity};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Default number of events retained by the audit log.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// Well-known event types.
pub mod event_types {
    /// A 401 was returned.
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    /// A 403 was returned.
    pub const AUTHORIZATION_FAILURE: &str = "authorization_failure";
    /// A caller exceeded its quota.
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
    /// Size, content type, user agent or IP check failed.
    pub const REQUEST_VALIDATION_FAILED: &str = "request_validation_failed";
    /// Path, query or header pattern check failed.
    pub const SECURITY_CHECK_FAILED: &str = "security_check_failed";
    /// A successful response lacked a required header.
    pub const RESPONSE_VALIDATION_FAILED: &str = "response_validation_failed";
    /// The security-event logger saw a suspicious raw path or query.
    pub const SUSPICIOUS_PATTERN: &str = "suspicious_pattern";
}

/// Bounded ring of security events.
#[derive(Debug)]
pub struct SecurityAuditLog {
    capacity: usize,
    events: RwLock<VecDeque<SecurityEvent>>,
}

impl SecurityAuditLog {
    /// Creates a log holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends an event, discarding the oldest when full.
    pub fn push(&self, event: SecurityEvent) {
        let mut events = self.events.write();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Copies the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SecurityEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// Removes and returns every event, oldest first.
    pub fn drain(&self) -> Vec<SecurityEvent> {
        self.events.write().drain(..).collect()
    }

    /// Number of events currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns `true` if no events are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Maximum number of events held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SecurityAuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

/// Point-in-time copy of [`SecurityMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityMetricsSnapshot {
    /// Every event recorded.
    pub total_events: u64,
    /// Events by type.
    pub events_by_type: BTreeMap<String, u64>,
    /// Events by severity name.
    pub events_by_severity: BTreeMap<String, u64>,
    /// Authentication failures.
    pub failed_authentications: u64,
    /// Rate-limit rejections.
    pub rate_limit_violations: u64,
    /// Events of severity `high` or above.
    pub security_violations: u64,
    /// High-severity events per remote IP.
    pub suspicious_ips: BTreeMap<String, u64>,
}

/// Running security counters.
#[derive(Debug, Default)]
pub struct SecurityMetrics {
    inner: RwLock<SecurityMetricsSnapshot>,
}

impl SecurityMetrics {
    /// Folds one event into the counters.
    pub fn record(&self, event: &SecurityEvent) {
        let mut m = self.inner.write();
        m.total_events += 1;
        *m.events_by_type.entry(event.event_type.clone()).or_default() += 1;
        *m.events_by_severity
            .entry(event.severity.as_str().to_string())
            .or_default() += 1;

        match event.event_type.as_str() {
            event_types::AUTHENTICATION_FAILURE => m.failed_authentications += 1,
            event_types::RATE_LIMIT_EXCEEDED => m.rate_limit_violations += 1,
            _ => {}
        }

        if event.severity >= Severity::High {
            m.security_violations += 1;
            if let Some(ip) = &event.ip_address {
                *m.suspicious_ips.entry(ip.clone()).or_default() += 1;
            }
        }
    }

    /// Copies the current counters.
    #[must_use]
    pub fn snapshot(&self) -> SecurityMetricsSnapshot {
        self.inner.read().clone()
    }

    /// Resets every counter.
    pub fn reset(&self) {
        *self.inner.write() = SecurityMetricsSnapshot::default();
    }
}

/// Fan-out point for security events.
///
/// Cheap to clone; clones share the same log and counters.
#[derive(Debug, Clone, Default)]
pub struct SecuritySink {
    audit: Arc<SecurityAuditLog>,
    metrics: Arc<SecurityMetrics>,
}

impl SecuritySink {
    /// Creates a sink whose audit log holds `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            audit: Arc::new(SecurityAuditLog::new(capacity)),
            metrics: Arc::new(SecurityMetrics::default()),
        }
    }

    /// Logs, counts and retains an event.
    pub fn publish(&self, event: SecurityEvent) {
        crate::log_security_event!(event);
        record_security_event(&event.event_type, event.severity.as_str());
        self.metrics.record(&event);
        self.audit.push(event);
    }

    /// The audit ring.
    #[must_use]
    pub fn audit_log(&self) -> &SecurityAuditLog {
        &self.audit
    }

    /// The running counters.
    #[must_use]
    pub fn metrics(&self) -> &SecurityMetrics {
        &self.metrics
    }
}
