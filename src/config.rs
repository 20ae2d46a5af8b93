use crate::errors::{AppError, Result};
use crate::domain::limiter::MAX_BLOCK_DURATION_SECONDS;
use crate::storage::BackendKind;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Storage backend tag: "memory" or "networked"
    pub backend: String,
    pub ip_limit: u64,
    pub token_limit: u64,
    pub ip_block_duration_seconds: u64,
    pub token_block_duration_seconds: u64,
    pub enable_ip_limiter: bool,
    pub enable_token_limiter: bool,
    /// Request header carrying the API token
    pub token_header: String,
    /// Take the client IP from X-Forwarded-For / X-Real-IP when present
    pub trust_proxy_headers: bool,
    pub storage_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Determine environment
        let environment =
            env::var("THROTTLE_GATE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            // Start with default config
            .add_source(config::File::with_name("config/default"))
            // Add environment-specific config
            .add_source(
                config::File::with_name(&format!("config/{}", environment)).required(false),
            )
            // Add environment variables with prefix THROTTLE_GATE
            // e.g., THROTTLE_GATE__RATE_LIMIT__IP_LIMIT=20
            .add_source(
                config::Environment::with_prefix("THROTTLE_GATE")
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat variable names used by existing deployments win over the above
            .set_override_option("rate_limit.ip_limit", env::var("RATE_LIMIT_IP").ok())
            .and_then(|b| {
                b.set_override_option("rate_limit.token_limit", env::var("RATE_LIMIT_TOKEN").ok())
            })
            .and_then(|b| {
                b.set_override_option(
                    "rate_limit.ip_block_duration_seconds",
                    env::var("BLOCK_DURATION_IP").ok(),
                )
            })
            .and_then(|b| {
                b.set_override_option(
                    "rate_limit.token_block_duration_seconds",
                    env::var("BLOCK_DURATION_TOKEN").ok(),
                )
            })
            .and_then(|b| {
                b.set_override_option(
                    "rate_limit.enable_ip_limiter",
                    env::var("ENABLE_IP_LIMITER").ok(),
                )
            })
            .and_then(|b| {
                b.set_override_option(
                    "rate_limit.enable_token_limiter",
                    env::var("ENABLE_TOKEN_LIMITER").ok(),
                )
            })
            .and_then(|b| b.set_override_option("redis.url", legacy_redis_url()))
            .map_err(|e| AppError::Configuration(e.to_string()))?
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        // Deserialize into our Config struct
        config
            .try_deserialize()
            .map_err(|e| AppError::Configuration(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate server config
        if self.server.port == 0 {
            return Err(AppError::Configuration("Invalid port number".to_string()));
        }

        // Validate limiter config
        let backend: BackendKind = self.rate_limit.backend.parse()?;

        let limits = [
            (
                "ip",
                self.rate_limit.enable_ip_limiter,
                self.rate_limit.ip_limit,
                self.rate_limit.ip_block_duration_seconds,
            ),
            (
                "token",
                self.rate_limit.enable_token_limiter,
                self.rate_limit.token_limit,
                self.rate_limit.token_block_duration_seconds,
            ),
        ];

        for (kind, enabled, limit, block_seconds) in limits {
            if !enabled {
                continue;
            }
            if limit == 0 {
                return Err(AppError::Configuration(format!(
                    "The {} limit must be greater than zero",
                    kind
                )));
            }
            if block_seconds == 0 {
                return Err(AppError::Configuration(format!(
                    "The {} block duration must be greater than zero",
                    kind
                )));
            }
            if block_seconds > MAX_BLOCK_DURATION_SECONDS {
                return Err(AppError::Configuration(format!(
                    "The {} block duration must not exceed {} seconds",
                    kind, MAX_BLOCK_DURATION_SECONDS
                )));
            }
        }

        if self.rate_limit.storage_timeout_ms == 0 {
            return Err(AppError::Configuration(
                "Storage timeout must be greater than zero".to_string(),
            ));
        }

        if self.rate_limit.token_header.trim().is_empty() {
            return Err(AppError::Configuration(
                "Token header name is required".to_string(),
            ));
        }

        // Validate Redis config
        if backend == BackendKind::Networked && self.redis.url.is_empty() {
            return Err(AppError::Configuration(
                "Redis URL is required for the networked backend".to_string(),
            ));
        }

        Ok(())
    }
}

/// Assemble a Redis URL from the REDIS_HOST/PORT/PASSWORD/DB variables, if set
fn legacy_redis_url() -> Option<String> {
    let host = env::var("REDIS_HOST").ok()?;
    let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
    let password = env::var("REDIS_PASSWORD").ok();
    let db = env::var("REDIS_DB").ok();

    Some(redis_url_from_parts(
        &host,
        &port,
        password.as_deref(),
        db.as_deref(),
    ))
}

pub fn redis_url_from_parts(
    host: &str,
    port: &str,
    password: Option<&str>,
    db: Option<&str>,
) -> String {
    let auth = match password {
        Some(password) if !password.is_empty() => format!(":{}@", password),
        _ => String::new(),
    };
    let db = db.filter(|db| !db.is_empty()).unwrap_or("0");

    format!("redis://{}{}:{}/{}", auth, host, port, db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = Config::load().expect("Failed to load config");
        assert!(config.validate().is_ok());

        // Test invalid port
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_limits() {
        let config = Config::load().expect("Failed to load config");
        assert_eq!(config.rate_limit.token_header, "API_KEY");
        assert!(config.rate_limit.storage_timeout_ms > 0);
    }

    #[test]
    fn test_validation_rejects_bad_limiter_settings() {
        let base = Config::load().expect("Failed to load config");

        let mut config = base.clone();
        config.rate_limit.backend = "cassandra".to_string();
        assert!(matches!(
            config.validate(),
            Err(AppError::RateLimit(
                crate::rate_limit::RateLimitError::InvalidBackendType(_)
            ))
        ));

        let mut config = base.clone();
        config.rate_limit.ip_limit = 0;
        assert!(config.validate().is_err());

        // A disabled limiter may carry a zero limit
        config.rate_limit.enable_ip_limiter = false;
        assert!(config.validate().is_ok());

        let mut config = base.clone();
        config.rate_limit.token_block_duration_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.rate_limit.ip_block_duration_seconds = 10_000_000_000_000;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
        config.rate_limit.ip_block_duration_seconds = MAX_BLOCK_DURATION_SECONDS;
        assert!(config.validate().is_ok());

        let mut config = base;
        config.rate_limit.backend = "networked".to_string();
        config.redis.url = String::new();
        assert!(config.validate().is_err());

        config.rate_limit.backend = "memory".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_url_from_parts() {
        assert_eq!(
            redis_url_from_parts("localhost", "6379", None, None),
            "redis://localhost:6379/0"
        );
        assert_eq!(
            redis_url_from_parts("cache", "6380", Some("s3cret"), Some("2")),
            "redis://:s3cret@cache:6380/2"
        );
        assert_eq!(
            redis_url_from_parts("cache", "6379", Some(""), Some("")),
            "redis://cache:6379/0"
        );
    }
}
