//! Layered configuration loader.
//!
//! Layers are applied in call order over a base of defaults or a preset:
//! files and strings are deep-merged, so a file only needs the keys it
//! changes, and environment overrides are applied last by [`ConfigLoader::load`].

use std::env;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::{ConfigError, EdgeConfig};

/// Configuration loader with a layered approach.
///
/// # Example
///
/// ```no_run
/// use nutrition_edge_config::ConfigLoader;
///
/// # fn main() -> Result<(), nutrition_edge_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production("api.example.com")
///     .with_optional_file("edge.toml")?
///     .with_dotenv()
///     .with_env_prefix("EDGE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: EdgeConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EdgeConfig::default(),
            env_prefix: None,
        }
    }

    /// Resets the base to defaults.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = EdgeConfig::default();
        self
    }

    /// Resets the base to the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use nutrition_edge_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = EdgeConfig::development();
        self
    }

    /// Resets the base to the production preset for `domain`.
    #[must_use]
    pub fn with_production(mut self, domain: &str) -> Self {
        self.config = EdgeConfig::production(domain);
        self
    }

    /// Merges a TOML or JSON file, chosen by extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed,
    /// has an unsupported extension, or names unknown fields.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;

        self.with_string(&content, &format)
    }

    /// Merges a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merges configuration text in `format` ("toml" or "json").
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the result does not fit the
    /// schema.
    ///
    /// # Example
    ///
    /// ```
    /// use nutrition_edge_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[rate_limit]\nrequests = 3", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.rate_limit.requests, 3);
    /// assert_eq!(config.rate_limit.window_secs, 900);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let overlay: Value = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        let mut base = serde_json::to_value(&self.config)?;
        merge(&mut base, overlay);
        self.config = serde_json::from_value(base)?;
        Ok(self)
    }

    /// Sets the prefix of environment overrides.
    ///
    /// Variables have the form `PREFIX__SECTION__KEY`, e.g.
    /// `EDGE__RATE_LIMIT__REQUESTS=50` or
    /// `EDGE__TELEMETRY__LOGGING__LEVEL=debug`. List fields take
    /// comma-separated values.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Loads `.env` into the process environment, if present.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        // A missing .env is not an error.
        let _ = dotenvy::dotenv();
        self
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation
    /// fails.
    pub fn load(self) -> Result<EdgeConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides without validating.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed.
    pub fn load_unvalidated(self) -> Result<EdgeConfig, ConfigError> {
        match self.env_prefix {
            Some(prefix) => apply_env_overrides(self.config, &prefix, env::vars()),
            None => Ok(self.config),
        }
    }
}

/// Applies `PREFIX__SECTION__KEY` variables from `vars` to `config`.
///
/// Keys that name no field are ignored.
fn apply_env_overrides(
    config: EdgeConfig,
    prefix: &str,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<EdgeConfig, ConfigError> {
    let marker = format!("{prefix}__");
    let mut root = serde_json::to_value(&config)?;
    let mut touched: Option<String> = None;

    for (key, value) in vars {
        let Some(path) = key.strip_prefix(&marker) else {
            continue;
        };
        let segments: Vec<String> = path.split("__").map(str::to_lowercase).collect();
        let applied = set_path(&mut root, &segments, &value)
            .map_err(|reason| ConfigError::env_parse_error(&key, reason))?;
        if applied {
            touched = Some(key);
        }
    }

    serde_json::from_value(root).map_err(|e| match touched {
        Some(var) => ConfigError::env_parse_error(var, e.to_string()),
        None => ConfigError::JsonError(e),
    })
}

/// Writes `raw` at `segments`, typed after the value already there.
/// Returns `Ok(false)` when the path names no field.
fn set_path(root: &mut Value, segments: &[String], raw: &str) -> Result<bool, String> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(false);
    };

    let mut node = root;
    for segment in parents {
        match node.get_mut(segment.as_str()) {
            Some(child) if child.is_object() => node = child,
            _ => return Ok(false),
        }
    }
    let Some(slot) = node.get_mut(last.as_str()) else {
        return Ok(false);
    };

    let next = match &*slot {
        Value::Bool(_) => Value::Bool(parse_bool(raw).ok_or("expected boolean")?),
        Value::Number(n) if n.is_u64() => {
            Value::from(raw.trim().parse::<u64>().map_err(|_| "expected unsigned integer")?)
        }
        Value::Number(_) => Value::from(raw.trim().parse::<f64>().map_err(|_| "expected number")?),
        Value::String(_) => Value::String(raw.to_string()),
        Value::Array(_) => Value::Array(split_list(raw)),
        Value::Null if raw.is_empty() => Value::Null,
        Value::Null => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        Value::Object(_) => return Err("expected a key, found a section".to_string()),
    };
    *slot = next;
    Ok(true)
}

fn split_list(raw: &str) -> Vec<Value> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
        .collect()
}

/// Recursively merges `overlay` into `base`; non-object values replace.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => merge_maps(base, overlay),
        (base, overlay) => *base = overlay,
    }
}

fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeadersProfile, RateLimitStoreKind};
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, EdgeConfig::default());
    }

    #[test]
    fn test_toml_file_merges_over_preset() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[auth]
jwt_secret = "file-secret-file-secret-file-secret"

[cache]
max_entries = 50
"#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_production("api.example.com")
            .with_file(file.path())
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.security_headers.profile, HeadersProfile::Production);
        assert_eq!(config.security_headers.domain, "api.example.com");
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"compression": {{"level": 9}}}}"#).unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.compression.level, 9);
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new().with_file("/nonexistent/edge.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));

        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/edge.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config, EdgeConfig::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let result = ConfigLoader::new().with_file(file.path());
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_unknown_field_in_file_is_rejected() {
        let result = ConfigLoader::new().with_string("[cache]\nmax_entris = 5", "toml");
        assert!(matches!(result, Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_invalid_value_fails_load() {
        let result = ConfigLoader::new()
            .with_string(r#"{"compression": {"level": 12}}"#, "json")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_load_unvalidated_skips_validation() {
        let config = ConfigLoader::new()
            .with_string(r#"{"compression": {"level": 12}}"#, "json")
            .unwrap()
            .load_unvalidated()
            .unwrap();
        assert_eq!(config.compression.level, 12);
    }

    #[test]
    fn test_env_overrides() {
        let config = apply_env_overrides(
            EdgeConfig::default(),
            "EDGE",
            vars(&[
                ("EDGE__RATE_LIMIT__REQUESTS", "50"),
                ("EDGE__RATE_LIMIT__STORE", "redis"),
                ("EDGE__RATE_LIMIT__REDIS_URL", "redis://cache:6379/"),
                ("EDGE__CACHE__ENABLED", "off"),
                ("EDGE__VALIDATION__BLOCKED_IPS", "10.0.0.1, 10.0.0.2"),
                ("EDGE__AUTH__PUBLIC_ROUTES", r#"["/health"]"#),
                ("EDGE__TELEMETRY__LOGGING__LEVEL", "warn"),
                ("EDGE__NOT__A__FIELD", "ignored"),
                ("OTHER__CACHE__ENABLED", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.rate_limit.requests, 50);
        assert_eq!(config.rate_limit.store, RateLimitStoreKind::Redis);
        assert_eq!(config.rate_limit.redis_url.as_deref(), Some("redis://cache:6379/"));
        assert!(!config.cache.enabled);
        assert_eq!(config.validation.blocked_ips, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(config.auth.public_routes, Some(vec!["/health".to_string()]));
        assert_eq!(config.telemetry.logging.level, "warn");
    }

    #[test]
    fn test_env_type_errors() {
        let result = apply_env_overrides(
            EdgeConfig::default(),
            "EDGE",
            vars(&[("EDGE__RATE_LIMIT__REQUESTS", "many")]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::EnvParseError { var, .. }) if var == "EDGE__RATE_LIMIT__REQUESTS"
        ));

        let result = apply_env_overrides(
            EdgeConfig::default(),
            "EDGE",
            vars(&[("EDGE__RATE_LIMIT__STORE", "memcached")]),
        );
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
