//! Typed, environment-driven configuration.
//!
//! Mirrors the shape of the teacher's `AppConfig` / `RedisConfig` / `MonitoringConfig`
//! split, with defaults lifted from the original `WorkerRedisConfig` constants
//! (max connections, socket timeouts, blocking timeout, heartbeat TTL).

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Top-level configuration for a worker/promoter/sweeper process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub worker: WorkerConfig,
    pub provider: ProviderConfig,
    pub rate_limit: RateLimitConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Bounded capacity of the non-blocking connection pool.
    pub max_connections: u32,
    /// Socket timeout for ordinary (non-blocking) commands, seconds.
    pub socket_timeout_secs: u64,
    /// Timeout passed to BLPOP itself, seconds. Dispatcher ticks on expiry.
    pub blocking_timeout_secs: u64,
    /// Socket timeout for the dedicated blocking connection: must exceed
    /// `blocking_timeout_secs` by a comfortable margin or the socket read
    /// races the server-side BLPOP deadline.
    pub blocking_socket_slack_secs: u64,
    pub health_check_interval_secs: u64,
}

impl RedisConfig {
    pub fn blocking_socket_timeout(&self) -> Duration {
        Duration::from_secs(self.blocking_timeout_secs + self.blocking_socket_slack_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_retries: u32,
    pub heartbeat_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Retry-queue depth at which the adaptive ratio steps down from 0.3 to 0.2.
    pub retry_warning_depth: u64,
    /// Retry-queue depth at which the adaptive ratio steps down to 0.1.
    pub retry_critical_depth: u64,
    pub promoter_interval_secs: u64,
    pub promoter_batch_size: isize,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout_secs: u64,
    pub provider_state_lock_ttl_secs: u64,
    pub provider_state_fresh_secs: i64,
    pub provider_state_stale_secs: i64,
    pub metrics_retention_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Default requests-per-interval budget used to seed a bucket the first
    /// time it is observed empty (capacity == 0), matching the original
    /// Lua script's `requests or 230` / `interval or '10s'` fallback.
    pub default_requests: f64,
    pub default_interval_secs: f64,
    pub acquire_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                max_connections: 30,
                socket_timeout_secs: 60,
                blocking_timeout_secs: 5,
                blocking_socket_slack_secs: 10,
                health_check_interval_secs: 60,
            },
            worker: WorkerConfig {
                max_retries: 5,
                heartbeat_ttl_secs: 90,
                heartbeat_interval_secs: 30,
                retry_warning_depth: 100,
                retry_critical_depth: 500,
                promoter_interval_secs: 1,
                promoter_batch_size: 100,
                breaker_failure_threshold: 5,
                breaker_reset_timeout_secs: 60,
                provider_state_lock_ttl_secs: 10,
                provider_state_fresh_secs: 60,
                provider_state_stale_secs: 300,
                metrics_retention_days: 30,
            },
            provider: ProviderConfig {
                base_url: "https://openrouter.ai/api/v1".to_string(),
                api_key: String::new(),
                model: "openrouter/auto".to_string(),
                timeout_secs: 60,
            },
            rate_limit: RateLimitConfig {
                default_requests: 230.0,
                default_interval_secs: 10.0,
                acquire_timeout_secs: 30.0,
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
                log_json: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment (`.env` included, via
    /// `dotenvy`), falling back to defaults for anything unset or malformed.
    /// Never panics: a bad value is logged and the default is kept.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        cfg.redis.url = env_or("REDIS_URL", cfg.redis.url);
        cfg.redis.max_connections = env_parse_or("REDIS_MAX_CONNECTIONS", cfg.redis.max_connections);
        cfg.redis.socket_timeout_secs = env_parse_or("REDIS_SOCKET_TIMEOUT", cfg.redis.socket_timeout_secs);
        cfg.redis.blocking_timeout_secs = env_parse_or("REDIS_BLPOP_TIMEOUT", cfg.redis.blocking_timeout_secs);
        cfg.redis.health_check_interval_secs =
            env_parse_or("REDIS_HEALTH_CHECK_INTERVAL", cfg.redis.health_check_interval_secs);

        cfg.worker.max_retries = env_parse_or("MAX_RETRIES", cfg.worker.max_retries);
        cfg.worker.heartbeat_ttl_secs = env_parse_or("WORKER_HEARTBEAT_TTL", cfg.worker.heartbeat_ttl_secs);
        cfg.worker.heartbeat_interval_secs =
            env_parse_or("WORKER_HEARTBEAT_INTERVAL", cfg.worker.heartbeat_interval_secs);
        cfg.worker.retry_warning_depth = env_parse_or("RETRY_WARNING_DEPTH", cfg.worker.retry_warning_depth);
        cfg.worker.retry_critical_depth = env_parse_or("RETRY_CRITICAL_DEPTH", cfg.worker.retry_critical_depth);
        cfg.worker.promoter_interval_secs =
            env_parse_or("PROMOTER_INTERVAL_SECS", cfg.worker.promoter_interval_secs);
        cfg.worker.breaker_failure_threshold =
            env_parse_or("BREAKER_FAILURE_THRESHOLD", cfg.worker.breaker_failure_threshold);
        cfg.worker.breaker_reset_timeout_secs =
            env_parse_or("BREAKER_RESET_TIMEOUT", cfg.worker.breaker_reset_timeout_secs);

        cfg.provider.base_url = env_or("OPENROUTER_BASE_URL", cfg.provider.base_url);
        cfg.provider.api_key = env_or("OPENROUTER_API_KEY", cfg.provider.api_key);
        cfg.provider.model = env_or("OPENROUTER_MODEL", cfg.provider.model);
        cfg.provider.timeout_secs = env_parse_or("OPENROUTER_TIMEOUT", cfg.provider.timeout_secs);

        cfg.rate_limit.default_requests = env_parse_or("RATE_LIMIT_REQUESTS", cfg.rate_limit.default_requests);
        cfg.rate_limit.default_interval_secs =
            env_parse_or("RATE_LIMIT_INTERVAL_SECS", cfg.rate_limit.default_interval_secs);

        cfg.monitoring.log_level = env_or("LOG_LEVEL", cfg.monitoring.log_level);
        cfg.monitoring.log_json = env_parse_or("LOG_JSON", cfg.monitoring.log_json);

        cfg
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, "malformed environment value, using default");
            default
        }),
        Err(_) => default,
    }
}
