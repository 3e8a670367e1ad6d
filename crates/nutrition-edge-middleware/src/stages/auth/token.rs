//! HS256 token issuing and verification.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use nutrition_edge_core::{Claims, EdgeError, RefreshClaims};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default access-token lifetime.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Default refresh-token lifetime.
pub const DEFAULT_REFRESH_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors raised while building an issuer or signing a token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The signing secret is empty.
    #[error("JWT signing secret must not be empty")]
    EmptySecret,

    /// Signing failed.
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Signs and verifies HS256 tokens with a shared secret.
///
/// # Example
///
/// ```
/// use nutrition_edge_middleware::stages::TokenIssuer;
///
/// let issuer = TokenIssuer::new(b"a-long-and-random-signing-secret").unwrap();
/// let token = issuer
///     .issue_access_token("u-1", "alice@example.com", "member", false)
///     .unwrap();
/// let claims = issuer.verify(&token).unwrap();
/// assert_eq!(claims.user_id, "u-1");
/// ```
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("token_lifetime", &self.token_lifetime)
            .field("refresh_lifetime", &self.refresh_lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Creates an issuer with default lifetimes.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::EmptySecret`] if `secret` is empty.
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            refresh_lifetime: DEFAULT_REFRESH_LIFETIME,
        })
    }

    /// Sets the access-token lifetime.
    #[must_use]
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Sets the refresh-token lifetime.
    #[must_use]
    pub fn with_refresh_lifetime(mut self, lifetime: Duration) -> Self {
        self.refresh_lifetime = lifetime;
        self
    }

    /// Returns the access-token lifetime.
    #[must_use]
    pub fn token_lifetime(&self) -> Duration {
        self.token_lifetime
    }

    /// Returns the refresh-token lifetime.
    #[must_use]
    pub fn refresh_lifetime(&self) -> Duration {
        self.refresh_lifetime
    }

    /// Signs arbitrary claims. Exposed for callers that need custom windows.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn sign<T: serde::Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    /// Issues an access token valid from now for the configured lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn issue_access_token(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
        is_admin: bool,
    ) -> Result<String, TokenError> {
        let now = jsonwebtoken::get_current_timestamp();
        self.sign(&Claims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            is_admin,
            iat: now,
            nbf: now,
            exp: now + self.token_lifetime.as_secs(),
        })
    }

    /// Issues a refresh token for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn issue_refresh_token(&self, user_id: &str) -> Result<String, TokenError> {
        let now = jsonwebtoken::get_current_timestamp();
        self.sign(&RefreshClaims {
            sub: user_id.to_string(),
            iat: now,
            nbf: now,
            exp: now + self.refresh_lifetime.as_secs(),
        })
    }

    /// Verifies an access token.
    ///
    /// Only HS256 is accepted. The token must satisfy `nbf <= now < exp`.
    /// Every failure is reported as `unauthorized` with the message
    /// `Invalid token`; the cause is kept in the error detail.
    ///
    /// # Errors
    ///
    /// Returns an `unauthorized` [`EdgeError`] if the token is rejected.
    pub fn verify(&self, token: &str) -> Result<Claims, EdgeError> {
        self.decode_window(token, |c: &Claims| (c.nbf, c.exp))
    }

    /// Verifies a refresh token under the same rules as [`verify`](Self::verify).
    ///
    /// # Errors
    ///
    /// Returns an `unauthorized` [`EdgeError`] if the token is rejected.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, EdgeError> {
        self.decode_window(token, |c: &RefreshClaims| (c.nbf, c.exp))
    }

    fn decode_window<T, F>(&self, token: &str, window: F) -> Result<T, EdgeError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> (u64, u64),
    {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf"]);

        let data = decode::<T>(token, &self.decoding, &validation)
            .map_err(|e| invalid_token(e.to_string()))?;

        // The library admits `exp == now`; the window is half-open.
        let (nbf, exp) = window(&data.claims);
        let now = jsonwebtoken::get_current_timestamp();
        if now < nbf {
            return Err(invalid_token("token not yet valid"));
        }
        if now >= exp {
            return Err(invalid_token("token expired"));
        }
        Ok(data.claims)
    }
}

fn invalid_token(detail: impl Into<String>) -> EdgeError {
    EdgeError::unauthorized("Invalid token").with_detail(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"unit-test-secret-with-enough-entropy";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SECRET).unwrap()
    }

    fn claims(nbf: u64, exp: u64) -> Claims {
        Claims {
            user_id: "u-7".to_string(),
            email: "u7@example.com".to_string(),
            role: "member".to_string(),
            is_admin: false,
            iat: nbf,
            nbf,
            exp,
        }
    }

    #[test]
    fn test_empty_secret_is_refused() {
        assert!(matches!(TokenIssuer::new(b""), Err(TokenError::EmptySecret)));
    }

    #[test]
    fn test_access_token_round_trip() {
        let issuer = issuer();
        let token = issuer
            .issue_access_token("u-1", "a@example.com", "admin", true)
            .unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.user_id, "u-1");
        assert!(claims.is_admin);
        assert_eq!(claims.exp - claims.iat, DEFAULT_TOKEN_LIFETIME.as_secs());
        assert_eq!(claims.nbf, claims.iat);
    }

    #[test]
    fn test_refresh_token_lifetime() {
        let issuer = issuer();
        let token = issuer.issue_refresh_token("u-1").unwrap();
        let claims = issuer.verify_refresh(&token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = issuer()
            .issue_access_token("u-1", "a@example.com", "member", false)
            .unwrap();
        let other = TokenIssuer::new(b"a-different-secret").unwrap();
        let err = other.verify(&token).unwrap_err();
        assert_eq!(err.message(), "Invalid token");
        assert_eq!(err.status().as_u16(), 401);
    }

    #[test]
    fn test_other_algorithms_are_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims(jsonwebtoken::get_current_timestamp(), jsonwebtoken::get_current_timestamp() + 60),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(issuer().verify(&token).is_err());
    }

    #[test]
    fn test_not_before_boundary() {
        let issuer = issuer();
        let now = jsonwebtoken::get_current_timestamp();

        let current = issuer.sign(&claims(now, now + 600)).unwrap();
        assert!(issuer.verify(&current).is_ok());

        let future = issuer.sign(&claims(now + 5, now + 600)).unwrap();
        assert!(issuer.verify(&future).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let issuer = issuer();
        let now = jsonwebtoken::get_current_timestamp();
        let token = issuer.sign(&claims(now - 600, now - 1)).unwrap();
        let err = issuer.verify(&token).unwrap_err();
        assert_eq!(err.message(), "Invalid token");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(issuer().verify("not.a.jwt").is_err());
        assert!(issuer().verify("").is_err());
    }
}
