//! Redis cache configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top level cache configuration. Currently a thin wrapper around
/// [`RedisConfig`] since the queue transport and rate limiter share one
/// Redis instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis: RedisConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn development() -> Self {
        Self {
            enabled: true,
            redis: RedisConfig::development(),
        }
    }

    pub fn production() -> Self {
        Self {
            enabled: true,
            redis: RedisConfig::production(),
        }
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis server URL (redis://host:port/db)
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout
    #[serde(default = "default_timeout")]
    pub connect_timeout_ms: u64,

    /// Read timeout
    #[serde(default = "default_timeout")]
    pub read_timeout_ms: u64,

    /// Write timeout
    #[serde(default = "default_timeout")]
    pub write_timeout_ms: u64,

    /// Retry failed connections
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,

    /// Max retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retry delay in ms
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Key prefix to avoid collisions
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Default TTL for keys (seconds)
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    /// Authentication password
    #[serde(default)]
    pub password: Option<String>,

    /// Database number (0-15)
    #[serde(default)]
    pub database: u8,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            pool_size: 20,
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            retry_on_failure: true,
            max_retries: 3,
            retry_delay_ms: 1000,
            key_prefix: "jobforge".to_string(),
            default_ttl_secs: 3600,
            password: None,
            database: 0,
        }
    }
}

impl RedisConfig {
    /// Development configuration (local Redis)
    pub fn development() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            pool_size: 5,
            connect_timeout_ms: 2000,
            ..Self::default()
        }
    }

    /// Production configuration (larger pool, tighter retry budget)
    pub fn production() -> Self {
        Self {
            pool_size: 50,
            connect_timeout_ms: 3000,
            retry_on_failure: true,
            max_retries: 5,
            retry_delay_ms: 500,
            default_ttl_secs: 7200,
            key_prefix: "jobforge:prod".to_string(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl From<&crate::config::RedisConfig> for RedisConfig {
    /// Convert the top-level `[redis]` settings into the richer config the
    /// connection pool needs. `read_timeout_ms`/`write_timeout_ms` have no
    /// counterpart at the top level, so both default to `connect_timeout_ms`.
    fn from(config: &crate::config::RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            pool_size: config.pool_size,
            connect_timeout_ms: config.connect_timeout_ms,
            read_timeout_ms: config.connect_timeout_ms,
            write_timeout_ms: config.connect_timeout_ms,
            retry_on_failure: true,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            key_prefix: config.key_prefix.clone(),
            default_ttl_secs: default_ttl(),
            password: config.password.clone(),
            database: 0,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_pool_size() -> usize {
    20
}
fn default_timeout() -> u64 {
    5000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_key_prefix() -> String {
    "jobforge".to_string()
}
fn default_ttl() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379/0");
        assert_eq!(config.pool_size, 20);
        assert_eq!(config.connect_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_redis_config_development() {
        let config = RedisConfig::development();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.connect_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_redis_config_production() {
        let config = RedisConfig::production();
        assert_eq!(config.pool_size, 50);
        assert_eq!(config.key_prefix, "jobforge:prod");
    }

    #[test]
    fn test_cache_config() {
        let config = CacheConfig::default();
        assert!(config.enabled);
    }
}
