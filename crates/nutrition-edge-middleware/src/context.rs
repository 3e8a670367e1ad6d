//! Per-request context.
//!
//! The [`MiddlewareContext`] is created at pipeline entry and dropped after the
//! response is produced. Stages read and write it in order, so a write made by
//! stage N is visible to every later stage and to the handler.

use crate::types::{error_response, Response};
use nutrition_edge_core::{CallerIdentity, EdgeError, RequestId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Instant;

/// Context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use nutrition_edge_middleware::context::MiddlewareContext;
/// use nutrition_edge_core::CallerIdentity;
///
/// let mut ctx = MiddlewareContext::new();
/// assert!(ctx.user_id().is_none());
///
/// ctx.set_identity(CallerIdentity::User {
///     user_id: "user-123".to_string(),
///     email: "alice@example.com".to_string(),
///     role: "member".to_string(),
///     is_admin: false,
/// });
/// assert_eq!(ctx.user_id(), Some("user-123"));
/// assert!(!ctx.is_admin());
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    /// Correlation id for this request.
    request_id: RequestId,

    /// The authenticated identity of the caller.
    identity: CallerIdentity,

    /// When the request entered the pipeline.
    started_at: Instant,

    /// The error a stage short-circuited with, if any.
    error: Option<EdgeError>,

    /// Inputs parsed by the validator, keyed by name (`validated.<name>`).
    validated: HashMap<String, serde_json::Value>,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            identity: CallerIdentity::Anonymous,
            started_at: Instant::now(),
            error: None,
            validated: HashMap::new(),
            extensions: HashMap::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Sets the request ID.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }

    /// Returns the caller identity.
    #[must_use]
    pub fn identity(&self) -> &CallerIdentity {
        &self.identity
    }

    /// Sets the caller identity. Only the auth stage should call this.
    pub fn set_identity(&mut self, identity: CallerIdentity) {
        self.identity = identity;
    }

    /// Returns the authenticated user id, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.identity.user_id()
    }

    /// Returns the admin flag; `false` when unauthenticated.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.identity.is_admin()
    }

    /// Returns when the request entered the pipeline.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request entered the pipeline.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Records the error a stage is short-circuiting with.
    pub fn record_error(&mut self, error: EdgeError) {
        self.error = Some(error);
    }

    /// Records `error` and renders it as a response.
    ///
    /// This is how stages reject a request: the logger later reads the
    /// recorded error to classify the outcome.
    pub fn fail(&mut self, error: EdgeError) -> Response {
        let response = error_response(&error);
        self.record_error(error);
        response
    }

    /// Returns the recorded error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&EdgeError> {
        self.error.as_ref()
    }

    /// Stores a validated input under `name`.
    pub fn set_validated(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.validated.insert(name.into(), value);
    }

    /// Returns a validated input.
    #[must_use]
    pub fn validated(&self, name: &str) -> Option<&serde_json::Value> {
        self.validated.get(name)
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MiddlewareContext {
    /// Clones everything except extensions, which are not `Clone`.
    ///
    /// Handlers receive such a clone so their futures can outlive the borrow
    /// of the pipeline's context.
    fn clone(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            identity: self.identity.clone(),
            started_at: self.started_at,
            error: self.error.clone(),
            validated: self.validated.clone(),
            extensions: HashMap::new(),
        }
    }
}
