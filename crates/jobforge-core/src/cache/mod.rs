//! Redis-backed infrastructure shared by the coordinator and workers.
//!
//! This module provides:
//! - Connection pooling with automatic reconnect (`connection`)
//! - The durable FIFO backlog + pub/sub notifications behind the Queue
//!   Transport, C2 (`queue`)
//! - The token-bucket rate limiter behind C1 (`rate_limit`)
//!
//! ## Performance Characteristics
//!
//! - Connection pooling: reduces connection overhead
//! - Async operations: non-blocking Redis calls
//! - TTL support: automatic key expiration on idle buckets

pub mod config;
pub mod connection;
pub mod queue;
pub mod rate_limit;

pub use config::{CacheConfig, RedisConfig};
pub use connection::{RedisConnection, RedisPool};
pub use queue::QueueTransport;
pub use rate_limit::RedisRateLimiter;

/// Cache result type alias
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    ConnectionError(String),

    #[error("Operation failed: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Pool exhausted")]
    PoolExhausted,

    #[error("Timeout waiting for connection")]
    Timeout,
}

impl From<CacheError> for crate::Error {
    fn from(err: CacheError) -> Self {
        crate::Error::Cache(err.to_string())
    }
}

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Failed,
}

/// Cache key prefix to avoid collisions
#[derive(Debug, Clone)]
pub struct KeyPrefix {
    prefix: String,
}

impl KeyPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, key: impl AsRef<str>) -> String {
        format!("{}:{}", self.prefix, key.as_ref())
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::new("jobforge")
    }
}

/// Cache namespace for different data types stored under the same Redis
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    /// Rate limiter token buckets
    RateLimit,

    /// Job backlog lists
    JobQueue,

    /// Statistics cache
    Statistics,
}

impl CacheNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheNamespace::RateLimit => "rate:limit",
            CacheNamespace::JobQueue => "job:queue",
            CacheNamespace::Statistics => "stats",
        }
    }

    pub fn key(&self, key: impl AsRef<str>) -> String {
        format!("{}:{}", self.prefix(), key.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix() {
        let prefix = KeyPrefix::new("test");
        assert_eq!(prefix.key("user:123"), "test:user:123");
    }

    #[test]
    fn test_cache_namespace() {
        assert_eq!(
            CacheNamespace::RateLimit.key("ip:192.168.1.1"),
            "rate:limit:ip:192.168.1.1"
        );
        assert_eq!(
            CacheNamespace::JobQueue.key("sms"),
            "job:queue:sms"
        );
    }
}
