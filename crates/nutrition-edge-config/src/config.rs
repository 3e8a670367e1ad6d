//! Root configuration type.

use nutrition_edge_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};

use crate::{
    AuthConfig, CacheSection, CompressionSection, ConfigError, CorsSection, HeadersProfile,
    LoggingSection, RateLimitSection, RateLimitStoreKind, SecurityHeadersSection, ServerConfig,
    ValidationSection,
};

/// Complete edge configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and environment
/// variables over defaults or a preset.
///
/// # Example
///
/// ```
/// use nutrition_edge_config::EdgeConfig;
///
/// let config = EdgeConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.rate_limit.requests, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    /// HTTP server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Bearer-token authentication.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Request validator.
    #[serde(default)]
    pub validation: ValidationSection,

    /// Rate limiter.
    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// Response cache.
    #[serde(default)]
    pub cache: CacheSection,

    /// Security headers.
    #[serde(default)]
    pub security_headers: SecurityHeadersSection,

    /// Response compression.
    #[serde(default)]
    pub compression: CompressionSection,

    /// Cross-origin policy.
    #[serde(default)]
    pub cors: CorsSection,

    /// Request logging.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Log output, metrics and the audit ring.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl EdgeConfig {
    /// Development preset: readable logs with bodies, relaxed headers.
    ///
    /// # Example
    ///
    /// ```
    /// use nutrition_edge_config::{EdgeConfig, HeadersProfile};
    ///
    /// let config = EdgeConfig::development();
    /// assert_eq!(config.security_headers.profile, HeadersProfile::Development);
    /// assert!(config.logging.log_request_body);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        Self {
            security_headers: SecurityHeadersSection {
                profile: HeadersProfile::Development,
                hide_server_header: false,
                ..SecurityHeadersSection::default()
            },
            logging: LoggingSection {
                skip_paths: vec!["/health".to_string()],
                skip_health: false,
                log_request_body: true,
                log_response_body: true,
                max_body_bytes: 1024,
                ..LoggingSection::default()
            },
            telemetry: TelemetryConfig::development(),
            ..Self::default()
        }
    }

    /// Production preset for `domain`: strict headers and JSON logs.
    ///
    /// The JWT secret still has to be supplied.
    ///
    /// # Example
    ///
    /// ```
    /// use nutrition_edge_config::EdgeConfig;
    ///
    /// let config = EdgeConfig::production("api.example.com");
    /// assert_eq!(config.security_headers.domain, "api.example.com");
    /// assert!(config.validate().is_err()); // no secret yet
    /// ```
    #[must_use]
    pub fn production(domain: &str) -> Self {
        Self {
            security_headers: SecurityHeadersSection {
                profile: HeadersProfile::Production,
                domain: domain.to_string(),
                ..SecurityHeadersSection::default()
            },
            logging: LoggingSection {
                skip_paths: vec![
                    "/health".to_string(),
                    "/metrics".to_string(),
                    "/favicon.ico".to_string(),
                ],
                max_body_bytes: 512 * 1024,
                ..LoggingSection::default()
            },
            telemetry: TelemetryConfig::production(),
            ..Self::default()
        }
    }

    /// Returns `true` when the telemetry environment is `production`.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.telemetry.environment.eq_ignore_ascii_case("production")
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` or `ConfigError::ValidationError`
    /// for the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if !(1..=9).contains(&self.compression.level) {
            return Err(ConfigError::invalid_value(
                "compression.level",
                "must be between 1 and 9",
            ));
        }

        if self.rate_limit.enabled {
            if self.rate_limit.requests == 0 {
                return Err(ConfigError::invalid_value("rate_limit.requests", "must be positive"));
            }
            if self.rate_limit.window_secs == 0 {
                return Err(ConfigError::invalid_value(
                    "rate_limit.window_secs",
                    "must be positive",
                ));
            }
            for group in &self.rate_limit.groups {
                if group.requests == 0 || group.window_secs == 0 {
                    return Err(ConfigError::invalid_value(
                        format!("rate_limit.groups.{}", group.name),
                        "requests and window_secs must be positive",
                    ));
                }
            }
            if self.rate_limit.store == RateLimitStoreKind::Redis
                && self.rate_limit.redis_url.as_deref().map_or(true, str::is_empty)
            {
                return Err(ConfigError::validation_error(
                    "rate_limit.redis_url must be set when store is 'redis'",
                ));
            }
        }

        if self.cache.enabled {
            if self.cache.max_entries == 0 {
                return Err(ConfigError::invalid_value("cache.max_entries", "must be positive"));
            }
            if self.cache.max_entry_bytes == 0 {
                return Err(ConfigError::invalid_value(
                    "cache.max_entry_bytes",
                    "must be positive",
                ));
            }
        }

        if self.security_headers.profile == HeadersProfile::Production
            && self.security_headers.domain.trim().is_empty()
        {
            return Err(ConfigError::invalid_value(
                "security_headers.domain",
                "must be set for the production profile",
            ));
        }

        if self.auth.enabled && self.is_production() && self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::validation_error(
                "auth.jwt_secret must be set in production",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret(mut config: EdgeConfig) -> EdgeConfig {
        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        config
    }

    #[test]
    fn test_default_is_valid() {
        assert!(EdgeConfig::default().validate().is_ok());
        assert!(EdgeConfig::development().validate().is_ok());
    }

    #[test]
    fn test_production_requires_secret() {
        let config = EdgeConfig::production("api.example.com");
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
        assert!(with_secret(config).validate().is_ok());
    }

    #[test]
    fn test_production_requires_domain() {
        let config = with_secret(EdgeConfig::production("  "));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "security_headers.domain"
        ));
    }

    #[test]
    fn test_compression_level_bounds() {
        let mut config = EdgeConfig::default();
        config.compression.level = 0;
        assert!(config.validate().is_err());
        config.compression.level = 10;
        assert!(config.validate().is_err());
        config.compression.level = 9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rate_limit_constraints() {
        let mut config = EdgeConfig::default();
        config.rate_limit.requests = 0;
        assert!(config.validate().is_err());

        let mut config = EdgeConfig::default();
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = EdgeConfig::default();
        config.rate_limit.groups[0].requests = 0;
        assert!(config.validate().is_err());

        let mut config = EdgeConfig::default();
        config.rate_limit.store = RateLimitStoreKind::Redis;
        assert!(config.validate().is_err());
        config.rate_limit.redis_url = Some("redis://127.0.0.1:6379/".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_constraints() {
        let mut config = EdgeConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = EdgeConfig::default();
        config.cache.max_entry_bytes = 0;
        assert!(config.validate().is_err());

        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut config = EdgeConfig::default();
        config.server.http_addr = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }
}
