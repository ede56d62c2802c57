//! Engine configuration from environment variables.

use std::time::Duration;

use crate::engine::RetryPolicy;

/// Default exchange REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.india.delta.exchange";

/// Default bracket store location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://brackets.db?mode=rwc";

/// Default HTTP intake port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default per-request exchange timeout.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is absent.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: {value}")]
    InvalidVar {
        /// Variable name.
        var: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Exchange connection settings.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// REST base URL.
    pub base_url: String,
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Full engine configuration.
///
/// # Environment Variables
///
/// ## Required
/// - `DELTA_API_KEY`: exchange API key
/// - `DELTA_API_SECRET`: exchange API secret
///
/// ## Optional
/// - `DELTA_BASE_URL`: REST endpoint (default: the India production URL)
/// - `BRACKET_DB_URL`: SQLite URL for the bracket store
/// - `HTTP_PORT`: intake port (default: 8080)
/// - `CONFIRMATION_MAX_ATTEMPTS`: position confirmation attempt budget
/// - `LEG_MAX_ATTEMPTS`: per-leg attempt budget
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Exchange connection settings.
    pub exchange: ExchangeConfig,
    /// Bracket store database URL.
    pub database_url: String,
    /// HTTP intake port.
    pub http_port: u16,
    /// Retry policy for position confirmation.
    pub confirmation_retry: RetryPolicy,
    /// Retry policy for bracket legs.
    pub leg_retry: RetryPolicy,
}

impl EngineConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = require_var("DELTA_API_KEY")?;
        let api_secret = require_var("DELTA_API_SECRET")?;
        let base_url =
            std::env::var("DELTA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let database_url =
            std::env::var("BRACKET_DB_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let http_port = parse_var("HTTP_PORT", DEFAULT_HTTP_PORT)?;

        let mut confirmation_retry = RetryPolicy::confirmation();
        confirmation_retry.max_attempts =
            parse_var("CONFIRMATION_MAX_ATTEMPTS", confirmation_retry.max_attempts)?;

        let mut leg_retry = RetryPolicy::leg();
        leg_retry.max_attempts = parse_var("LEG_MAX_ATTEMPTS", leg_retry.max_attempts)?;

        Ok(Self {
            exchange: ExchangeConfig {
                base_url,
                api_key,
                api_secret,
                timeout: DEFAULT_EXCHANGE_TIMEOUT,
            },
            database_url,
            http_port,
            confirmation_retry,
            leg_retry,
        })
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidVar {
            var: name,
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let port = parse_var("BRACKET_TEST_UNSET_PORT", 8080u16).unwrap();
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_missing_required_var() {
        let err = require_var("BRACKET_TEST_DEFINITELY_UNSET").unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(_)));
    }
}
