//! Caller identity established by the auth stage.
//!
//! The auth stage only establishes *who* is calling. Authorization beyond the
//! admin flag is the handler's responsibility.

use serde::{Deserialize, Serialize};

/// Claims carried by an access token.
///
/// Invariant once accepted by the verifier: `nbf <= now < exp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The user the token was issued to.
    pub user_id: String,
    /// The user's email address.
    pub email: String,
    /// Free-form role name.
    pub role: String,
    /// Whether the caller passes the admin guard.
    #[serde(default)]
    pub is_admin: bool,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Not before (seconds since epoch).
    pub nbf: u64,
    /// Expires at (seconds since epoch).
    pub exp: u64,
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// The user the token was issued to.
    pub sub: String,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Not before (seconds since epoch).
    pub nbf: u64,
    /// Expires at (seconds since epoch).
    pub exp: u64,
}

/// The identity of the caller of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallerIdentity {
    /// No credentials were presented, or the route is public.
    #[default]
    Anonymous,
    /// A user authenticated with a bearer token.
    User {
        /// The user id from the token.
        user_id: String,
        /// The email from the token.
        email: String,
        /// The role from the token.
        role: String,
        /// The admin flag from the token.
        is_admin: bool,
    },
}

impl CallerIdentity {
    /// Returns the user id, if the caller is authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User { user_id, .. } => Some(user_id),
            Self::Anonymous => None,
        }
    }

    /// Returns `true` only for authenticated admins.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::User { is_admin: true, .. })
    }

    /// Returns a string identifier suitable for logging.
    ///
    /// Never contains secrets or token material.
    #[must_use]
    pub fn log_id(&self) -> String {
        match self {
            Self::User { user_id, .. } => format!("user:{user_id}"),
            Self::Anonymous => "anonymous".to_string(),
        }
    }
}

impl From<Claims> for CallerIdentity {
    fn from(claims: Claims) -> Self {
        Self::User {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
            is_admin: claims.is_admin,
        }
    }
}
