//! Process-wide configuration, populated once at startup from environment
//! variables (optionally loaded from a `.env` file) and handed to the
//! limiter, breaker, and proxy pipeline by construction. Live mutation is
//! not supported; tests that need different settings build their own
//! `Config` and construct fresh components from it.

use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_host: String,
    pub redis_port: u16,
    pub upstream_url: String,
    pub rate_limit_capacity: f64,
    pub rate_limit_refill_rate: f64,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_reset_timeout_seconds: i64,
    pub circuit_breaker_half_open_success_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            redis_host: "redis".to_string(),
            redis_port: 6379,
            upstream_url: "http://upstream-service:5001".to_string(),
            rate_limit_capacity: 100.0,
            rate_limit_refill_rate: 10.0,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_reset_timeout_seconds: 30,
            circuit_breaker_half_open_success_threshold: 2,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset. `.env` (if present) is read first via `dotenvy`.
    pub fn load() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            port: env_or("PORT", defaults.port)?,
            redis_host: std::env::var("REDIS_HOST").unwrap_or(defaults.redis_host),
            redis_port: env_or("REDIS_PORT", defaults.redis_port)?,
            upstream_url: std::env::var("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            rate_limit_capacity: env_or("RATE_LIMIT_CAPACITY", defaults.rate_limit_capacity)?,
            rate_limit_refill_rate: env_or("RATE_LIMIT_REFILL_RATE", defaults.rate_limit_refill_rate)?,
            circuit_breaker_failure_threshold: env_or(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                defaults.circuit_breaker_failure_threshold,
            )?,
            circuit_breaker_reset_timeout_seconds: env_or(
                "CIRCUIT_BREAKER_RESET_TIMEOUT_SECONDS",
                defaults.circuit_breaker_reset_timeout_seconds,
            )?,
            circuit_breaker_half_open_success_threshold: env_or(
                "CIRCUIT_BREAKER_HALF_OPEN_SUCCESS_THRESHOLD",
                defaults.circuit_breaker_half_open_success_threshold,
            )?,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, GatewayError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GatewayError::ClientError(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
