//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Environment name (dev, staging, prod)
    pub environment: String,

    /// Service name used as event source and in logs
    pub service_name: String,

    /// Log level filter
    pub log_level: String,

    /// Database connection URL for the cart table
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Single-table name holding cart rows
    pub carts_table: String,

    /// Whether domain events are published
    pub events_enabled: bool,

    /// Logical bus name recorded on outbox rows
    pub event_bus_name: String,

    /// Event source identifier
    pub event_source: String,

    /// Rate limit: sustained requests per second per client
    pub rate_limit_rps: u32,

    /// Rate limit: burst capacity per client
    pub rate_limit_burst: u32,

    /// Maximum accepted request body size in bytes
    pub max_request_size: usize,

    /// Whether the idempotency cache is active
    pub idempotency_enabled: bool,

    /// TTL for cached idempotent responses
    pub idempotency_ttl: Duration,

    /// Whether circuit breakers guard outbound calls
    pub circuit_breaker_enabled: bool,

    /// Consecutive failures before a breaker opens
    pub circuit_breaker_failure_threshold: u32,

    /// Consecutive half-open successes before a breaker closes
    pub circuit_breaker_success_threshold: u32,

    /// Cooldown before an open breaker admits probes
    pub circuit_breaker_timeout: Duration,

    /// Retry attempts for transient backend failures
    pub retry_max_attempts: u32,

    /// Initial retry backoff delay
    pub retry_initial_delay: Duration,

    /// Retry backoff cap
    pub retry_max_delay: Duration,

    /// Per-call deadline for backend reads
    pub read_timeout: Duration,

    /// Per-call deadline for backend writes
    pub write_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let config = Self {
            port: parse_env("APP_PORT", 8080)?,
            environment: env::var("ENV_NAME").unwrap_or_else(|_| "dev".to_string()),
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "cart-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            carts_table: env::var("CARTS_TABLE").unwrap_or_else(|_| "cart_rows".to_string()),
            events_enabled: parse_env("EVENTS_ENABLED", true)?,
            event_bus_name: env::var("EVENT_BUS_NAME").unwrap_or_else(|_| "default".to_string()),
            event_source: env::var("EVENT_SOURCE").unwrap_or_else(|_| "cart-service".to_string()),
            rate_limit_rps: parse_env("RATE_LIMIT_RPS", 100)?,
            rate_limit_burst: parse_env("RATE_LIMIT_BURST", 200)?,
            max_request_size: parse_env("MAX_REQUEST_SIZE", 1_048_576)?,
            idempotency_enabled: parse_env("IDEMPOTENCY_ENABLED", true)?,
            idempotency_ttl: parse_duration_env("IDEMPOTENCY_TTL", Duration::from_secs(24 * 3600))?,
            circuit_breaker_enabled: parse_env("CIRCUIT_BREAKER_ENABLED", true)?,
            circuit_breaker_failure_threshold: parse_env("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
            circuit_breaker_success_threshold: parse_env("CIRCUIT_BREAKER_SUCCESS_THRESHOLD", 3)?,
            circuit_breaker_timeout: parse_duration_env(
                "CIRCUIT_BREAKER_TIMEOUT",
                Duration::from_secs(30),
            )?,
            retry_max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 3)?,
            retry_initial_delay: parse_duration_env(
                "RETRY_INITIAL_DELAY",
                Duration::from_millis(100),
            )?,
            retry_max_delay: parse_duration_env("RETRY_MAX_DELAY", Duration::from_secs(5))?,
            read_timeout: parse_duration_env("DB_READ_TIMEOUT", Duration::from_millis(500))?,
            write_timeout: parse_duration_env("DB_WRITE_TIMEOUT", Duration::from_secs(1))?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.environment.as_str(), "dev" | "staging" | "prod") {
            return Err(ConfigError::InvalidValue("ENV_NAME"));
        }
        if !matches!(self.log_level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::InvalidValue("LOG_LEVEL"));
        }
        if self.rate_limit_rps == 0 || self.rate_limit_burst == 0 {
            return Err(ConfigError::InvalidValue("RATE_LIMIT_RPS"));
        }
        if self.retry_max_attempts == 0 || self.retry_max_attempts > 10 {
            return Err(ConfigError::InvalidValue("RETRY_MAX_ATTEMPTS"));
        }
        Ok(())
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "prod"
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Parse durations in the `300ms` / `30s` / `5m` / `24h` forms
fn parse_duration_env(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_duration(&value).ok_or(ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit())?;
    let (number, unit) = value.split_at(split);
    let number: u64 = number.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(number)),
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 3600)),
        _ => None,
    }
}
