//! Redis-backed token bucket rate limiting for producer submissions.
//!
//! Each identifier gets a bucket of `max_tokens` that refills at
//! `refill_rate` tokens/sec. The check-and-consume step runs as a single
//! Lua script so concurrent coordinator requests can't race each other into
//! reading a stale token count.

use crate::cache::{CacheError, CacheNamespace, CacheResult, RedisConfig, RedisPool};
use once_cell::sync::Lazy;
use redis::Script;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// `KEYS[1]` is the bucket hash key. `ARGV` is `[max_tokens, refill_rate,
/// now_ms, key_ttl_secs]`. Returns 1 if the request is allowed, 0 otherwise.
/// On allow, the bucket is left with one fewer token than it would
/// otherwise have; on deny, the bucket is left untouched.
static TOKEN_BUCKET_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local bucket_key = KEYS[1]
        local max_tokens = tonumber(ARGV[1])
        local refill_rate = tonumber(ARGV[2])
        local now_ms = tonumber(ARGV[3])
        local key_ttl = tonumber(ARGV[4])

        local bucket = redis.call('HMGET', bucket_key, 'tokens', 'last_request_ms')
        local tokens
        local last_request_ms

        if bucket[1] == false then
            tokens = max_tokens - 1
            last_request_ms = now_ms
        else
            tokens = tonumber(bucket[1])
            last_request_ms = tonumber(bucket[2])
            local elapsed_secs = (now_ms - last_request_ms) / 1000.0
            if elapsed_secs > 0 then
                tokens = math.min(max_tokens, tokens + elapsed_secs * refill_rate)
            end
        end

        local allowed = 0
        if tokens > 0 then
            allowed = 1
            if bucket[1] ~= false then
                tokens = tokens - 1
            end
        end

        redis.call('HMSET', bucket_key, 'tokens', tokens, 'last_request_ms', now_ms)
        redis.call('EXPIRE', bucket_key, key_ttl)

        return allowed
        "#,
    )
});

/// Redis-backed token bucket rate limiter (C1).
pub struct RedisRateLimiter {
    pool: RedisPool,
    config: RedisConfig,
}

impl RedisRateLimiter {
    pub async fn new(pool: RedisPool, config: RedisConfig) -> CacheResult<Self> {
        Ok(Self { pool, config })
    }

    fn bucket_key(&self, identifier: &str) -> String {
        format!(
            "{}:{}",
            self.config.key_prefix,
            CacheNamespace::RateLimit.key(identifier)
        )
    }

    /// Attempt to consume one token for `identifier`. `max_tokens` bounds
    /// the bucket size (also the burst allowance); `refill_rate` is tokens
    /// per second; `key_ttl` bounds how long an idle bucket survives in
    /// Redis (should comfortably exceed `max_tokens / refill_rate`).
    pub async fn check(
        &self,
        identifier: &str,
        max_tokens: u32,
        refill_rate: f64,
        key_ttl: Duration,
    ) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let key = self.bucket_key(identifier);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let allowed: i64 = conn
            .eval_script(
                &TOKEN_BUCKET_SCRIPT,
                &[key],
                &[
                    max_tokens.to_string(),
                    refill_rate.to_string(),
                    now_ms.to_string(),
                    key_ttl.as_secs().to_string(),
                ],
            )
            .await?;

        let allowed = allowed == 1;
        if allowed {
            debug!(identifier, "rate limit check passed");
        } else {
            warn!(identifier, "rate limit exceeded");
        }

        Ok(allowed)
    }

    /// Reset an identifier's bucket, e.g. for test fixtures or admin override.
    pub async fn reset(&self, identifier: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        conn.del(&self.bucket_key(identifier)).await
    }

    /// Block an identifier outright regardless of remaining tokens.
    pub async fn block(&self, identifier: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let key = format!("{}:blocklist:{}", self.config.key_prefix, identifier);
        conn.setex(&key, ttl.as_secs(), b"1").await?;
        warn!(identifier, "blocked identifier from submitting jobs");
        Ok(())
    }

    pub async fn unblock(&self, identifier: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let key = format!("{}:blocklist:{}", self.config.key_prefix, identifier);
        let deleted = conn.del(&key).await?;
        Ok(deleted)
    }

    pub async fn is_blocked(&self, identifier: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let key = format!("{}:blocklist:{}", self.config.key_prefix, identifier);
        conn.exists(&key).await
    }
}

impl From<CacheError> for crate::Error {
    fn from(err: CacheError) -> Self {
        crate::Error::Cache(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RedisConfig;

    #[tokio::test]
    async fn test_bucket_key_format() {
        let config = RedisConfig::default();
        let pool = RedisPool::new(config.clone()).await;

        if let Ok(pool) = pool {
            let limiter = RedisRateLimiter::new(pool, config).await.unwrap();
            let key = limiter.bucket_key("producer-1");
            assert!(key.contains("rate:limit"));
            assert!(key.contains("producer-1"));
        }
    }

    #[tokio::test]
    async fn test_check_allows_then_exhausts_burst() {
        let config = RedisConfig::default();
        let pool = RedisPool::new(config.clone()).await;

        if let Ok(pool) = pool {
            let limiter = RedisRateLimiter::new(pool, config).await.unwrap();
            let _ = limiter.reset("burst-test").await;

            for _ in 0..3 {
                let allowed = limiter
                    .check("burst-test", 3, 1.0, Duration::from_secs(60))
                    .await
                    .unwrap();
                assert!(allowed);
            }

            let allowed = limiter
                .check("burst-test", 3, 1.0, Duration::from_secs(60))
                .await
                .unwrap();
            assert!(!allowed);
        }
    }

    #[tokio::test]
    async fn test_block_unblock() {
        let config = RedisConfig::default();
        let pool = RedisPool::new(config.clone()).await;

        if let Ok(pool) = pool {
            let limiter = RedisRateLimiter::new(pool, config).await.unwrap();

            limiter
                .block("blocked-producer", Duration::from_secs(60))
                .await
                .unwrap();
            assert!(limiter.is_blocked("blocked-producer").await.unwrap());

            limiter.unblock("blocked-producer").await.unwrap();
            assert!(!limiter.is_blocked("blocked-producer").await.unwrap());
        }
    }
}
