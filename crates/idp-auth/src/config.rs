//! Authentication provider configuration.
//!
//! Configuration can be built in code ([`AuthProviderConfig::new`] plus
//! `with_*` setters) or loaded from environment variables
//! ([`AuthProviderConfig::from_env`]). Either way it is validated once, when
//! the provider starts. The client secret is redacted in Debug output.

use crate::error::AuthError;
use crate::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default interval between background JWKS refreshes (5 minutes).
pub const DEFAULT_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of attempts per request (first try included).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay between attempts, doubled after each failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default leeway applied to `exp`/`nbf` checks.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(0);

/// Upper bound on the `exp`/`nbf` leeway.
///
/// Prevents misconfiguration from silently accepting long-expired tokens.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Upper bound on attempts per request.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Provider configuration.
#[derive(Clone)]
pub struct AuthProviderConfig {
    /// Identity provider base URL (e.g. `https://idp.example.com`).
    pub base_url: String,

    /// Realm name.
    pub realm: String,

    /// OAuth client id of this service. Tokens must name it in `aud` or `azp`.
    pub client_id: String,

    /// OAuth client secret (as `SecretString`).
    pub client_secret: SecretString,

    /// How often the background task refreshes the key set.
    pub public_key_refresh_interval: Duration,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    /// Total attempts per request (1 disables retries).
    pub retry_attempts: u32,

    /// Base backoff delay; attempt `n` waits `retry_delay * 2^(n-1)`.
    pub retry_delay: Duration,

    /// Accept invalid TLS certificates. Development only.
    pub tls_insecure_skip_verify: bool,

    /// Leeway for `exp`/`nbf` validation.
    pub clock_skew: Duration,
}

impl fmt::Debug for AuthProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProviderConfig")
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field(
                "public_key_refresh_interval",
                &self.public_key_refresh_interval,
            )
            .field("request_timeout", &self.request_timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("tls_insecure_skip_verify", &self.tls_insecure_skip_verify)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required setting: {0}")]
    MissingValue(String),

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Invalid realm: {0}")]
    InvalidRealm(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid retry attempts: {0}")]
    InvalidRetryAttempts(String),

    #[error("Invalid clock skew: {0}")]
    InvalidClockSkew(String),

    #[error("Invalid boolean: {0}")]
    InvalidBool(String),
}

impl From<ConfigError> for AuthError {
    fn from(e: ConfigError) -> Self {
        AuthError::InvalidConfig(e.to_string())
    }
}

impl AuthProviderConfig {
    /// Create a configuration with default timings.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Identity provider base URL. **Should use HTTPS in production.**
    /// * `realm` - Realm name.
    /// * `client_id` - OAuth client id.
    /// * `client_secret` - OAuth client secret.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            realm: realm.into(),
            client_id: client_id.into(),
            client_secret,
            public_key_refresh_interval: DEFAULT_KEY_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            tls_insecure_skip_verify: false,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    /// Set the background key refresh interval.
    #[must_use]
    pub fn with_key_refresh_interval(mut self, interval: Duration) -> Self {
        self.public_key_refresh_interval = interval;
        self
    }

    /// Set the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set attempts per request and the base backoff delay.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Accept invalid TLS certificates.
    #[must_use]
    pub fn with_tls_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.tls_insecure_skip_verify = skip;
        self
    }

    /// Set the `exp`/`nbf` leeway.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Check every setting. Called by the provider before any network I/O.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingValue("base_url".into()));
        }
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::InvalidBaseUrl(format!("'{}': {e}", self.base_url)))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::InvalidBaseUrl(format!(
                "scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.realm.trim().is_empty() {
            return Err(ConfigError::MissingValue("realm".into()));
        }
        if self.realm.contains('/') {
            return Err(ConfigError::InvalidRealm(format!(
                "realm must not contain '/', got '{}'",
                self.realm
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingValue("client_id".into()));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(ConfigError::MissingValue("client_secret".into()));
        }

        if self.public_key_refresh_interval.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "public key refresh interval must be greater than 0".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "request timeout must be greater than 0".into(),
            ));
        }
        if self.retry_attempts == 0 || self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::InvalidRetryAttempts(format!(
                "must be between 1 and {MAX_RETRY_ATTEMPTS}, got {}",
                self.retry_attempts
            )));
        }
        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidClockSkew(format!(
                "must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                self.clock_skew.as_secs()
            )));
        }

        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for missing required variables or unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// Required: `IDP_BASE_URL`, `IDP_REALM`, `IDP_CLIENT_ID`, `IDP_CLIENT_SECRET`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for missing required variables or unparseable values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |name: &str| {
            vars.get(name)
                .cloned()
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let mut config = Self::new(
            required("IDP_BASE_URL")?,
            required("IDP_REALM")?,
            required("IDP_CLIENT_ID")?,
            SecretString::from(required("IDP_CLIENT_SECRET")?),
        );

        if let Some(secs) = parse_u64(vars, "IDP_PUBLIC_KEY_REFRESH_INTERVAL_SECONDS")? {
            config.public_key_refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(vars, "IDP_REQUEST_TIMEOUT_SECONDS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(value_str) = vars.get("IDP_RETRY_ATTEMPTS") {
            config.retry_attempts = value_str.parse().map_err(|e| {
                ConfigError::InvalidRetryAttempts(format!(
                    "IDP_RETRY_ATTEMPTS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;
        }
        if let Some(millis) = parse_u64(vars, "IDP_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(millis);
        }
        if let Some(value_str) = vars.get("IDP_TLS_INSECURE_SKIP_VERIFY") {
            config.tls_insecure_skip_verify = match value_str.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidBool(format!(
                        "IDP_TLS_INSECURE_SKIP_VERIFY must be true or false, got '{value_str}'"
                    )))
                }
            };
        }
        if let Some(secs) = parse_u64(vars, "IDP_CLOCK_SKEW_SECONDS")? {
            config.clock_skew = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_u64(vars: &HashMap<String, String>, name: &str) -> Result<Option<u64>, ConfigError> {
    vars.get(name)
        .map(|value_str| {
            value_str.parse::<u64>().map_err(|e| {
                ConfigError::InvalidDuration(format!(
                    "{name} must be a valid non-negative integer, got '{value_str}': {e}"
                ))
            })
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("IDP_BASE_URL".to_string(), "https://idp.test".to_string()),
            ("IDP_REALM".to_string(), "acme".to_string()),
            ("IDP_CLIENT_ID".to_string(), "svc".to_string()),
            ("IDP_CLIENT_SECRET".to_string(), "svc-secret".to_string()),
        ])
    }

    fn valid_config() -> AuthProviderConfig {
        AuthProviderConfig::new(
            "https://idp.test",
            "acme",
            "svc",
            SecretString::from("svc-secret"),
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = valid_config();

        assert_eq!(config.public_key_refresh_interval, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert!(!config.tls_insecure_skip_verify);
        assert_eq!(config.clock_skew, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = valid_config()
            .with_key_refresh_interval(Duration::from_secs(60))
            .with_request_timeout(Duration::from_secs(2))
            .with_retry(5, Duration::from_millis(50))
            .with_tls_insecure_skip_verify(true)
            .with_clock_skew(Duration::from_secs(30));

        assert_eq!(config.public_key_refresh_interval, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(50));
        assert!(config.tls_insecure_skip_verify);
        assert_eq!(config.clock_skew, Duration::from_secs(30));
    }

    #[test]
    fn test_config_debug_redacts_secret() {
        let config = AuthProviderConfig::new(
            "https://idp.test",
            "acme",
            "svc",
            SecretString::from("super-secret-value"),
        );

        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super-secret-value"));
    }

    #[test]
    fn test_validate_rejects_missing_values() {
        let mut config = valid_config();
        config.base_url = String::new();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingValue("base_url".into()))
        );

        let mut config = valid_config();
        config.realm = " ".into();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingValue("realm".into()))
        );

        let mut config = valid_config();
        config.client_id = String::new();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingValue("client_id".into()))
        );

        let mut config = valid_config();
        config.client_secret = SecretString::from("");
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingValue("client_secret".into()))
        );
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = valid_config();
        config.base_url = "not a url".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl(_))
        ));

        config.base_url = "ftp://idp.test".into();
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidBaseUrl(msg)) if msg.contains("scheme"))
        );
    }

    #[test]
    fn test_validate_rejects_realm_with_slash() {
        let mut config = valid_config();
        config.realm = "acme/evil".into();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRealm(_))));
    }

    #[test]
    fn test_validate_retry_attempts_bounds() {
        let config = valid_config().with_retry(0, Duration::from_millis(1));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryAttempts(_))
        ));

        let config = valid_config().with_retry(MAX_RETRY_ATTEMPTS + 1, Duration::from_millis(1));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetryAttempts(_))
        ));

        let config = valid_config().with_retry(1, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_clock_skew_bounds() {
        let config = valid_config().with_clock_skew(MAX_CLOCK_SKEW);
        assert!(config.validate().is_ok());

        let config = valid_config().with_clock_skew(Duration::from_secs(601));
        assert!(
            matches!(config.validate(), Err(ConfigError::InvalidClockSkew(msg)) if msg.contains("must not exceed 600"))
        );
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = valid_config().with_key_refresh_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration(_))
        ));

        let config = valid_config().with_request_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = AuthProviderConfig::from_vars(&base_vars()).expect("config loads");

        assert_eq!(config.base_url, "https://idp.test");
        assert_eq!(config.realm, "acme");
        assert_eq!(config.client_id, "svc");
        assert_eq!(config.client_secret.expose_secret(), "svc-secret");
        assert_eq!(config.public_key_refresh_interval, DEFAULT_KEY_REFRESH_INTERVAL);
        assert_eq!(config.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "IDP_PUBLIC_KEY_REFRESH_INTERVAL_SECONDS".to_string(),
            "60".to_string(),
        );
        vars.insert("IDP_REQUEST_TIMEOUT_SECONDS".to_string(), "3".to_string());
        vars.insert("IDP_RETRY_ATTEMPTS".to_string(), "5".to_string());
        vars.insert("IDP_RETRY_DELAY_MS".to_string(), "250".to_string());
        vars.insert("IDP_TLS_INSECURE_SKIP_VERIFY".to_string(), "TRUE".to_string());
        vars.insert("IDP_CLOCK_SKEW_SECONDS".to_string(), "15".to_string());

        let config = AuthProviderConfig::from_vars(&vars).expect("config loads");

        assert_eq!(config.public_key_refresh_interval, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert!(config.tls_insecure_skip_verify);
        assert_eq!(config.clock_skew, Duration::from_secs(15));
    }

    #[test]
    fn test_from_vars_missing_required() {
        for name in [
            "IDP_BASE_URL",
            "IDP_REALM",
            "IDP_CLIENT_ID",
            "IDP_CLIENT_SECRET",
        ] {
            let mut vars = base_vars();
            vars.remove(name);

            let result = AuthProviderConfig::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == name),
                "expected MissingEnvVar({name}), got {result:?}"
            );
        }
    }

    #[test]
    fn test_from_vars_rejects_non_numeric() {
        let mut vars = base_vars();
        vars.insert("IDP_RETRY_DELAY_MS".to_string(), "soon".to_string());

        let result = AuthProviderConfig::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidDuration(msg)) if msg.contains("IDP_RETRY_DELAY_MS"))
        );

        let mut vars = base_vars();
        vars.insert("IDP_RETRY_ATTEMPTS".to_string(), "-1".to_string());
        assert!(matches!(
            AuthProviderConfig::from_vars(&vars),
            Err(ConfigError::InvalidRetryAttempts(_))
        ));
    }

    #[test]
    fn test_config_error_converts_to_invalid_config() {
        let err = AuthError::from(ConfigError::MissingEnvVar("IDP_REALM".into()));
        assert!(matches!(err, AuthError::InvalidConfig(msg) if msg.contains("IDP_REALM")));
    }

    #[test]
    fn test_from_vars_rejects_bad_bool() {
        let mut vars = base_vars();
        vars.insert(
            "IDP_TLS_INSECURE_SKIP_VERIFY".to_string(),
            "maybe".to_string(),
        );

        assert!(matches!(
            AuthProviderConfig::from_vars(&vars),
            Err(ConfigError::InvalidBool(_))
        ));
    }
}
