//! Redis cache backend.
//!
//! Token-bucket updates run as a Lua script so that refill, compare and
//! decrement happen in one server-side step, shared by every service
//! instance pointing at the same Redis.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::info;

use crate::backend::{BucketSpec, CacheBackend, TokenTake};
use crate::error::{CacheError, Result};

/// Refill-then-take on a hash `{tokens, ts, allowed, blocked}`.
///
/// Lua numbers are truncated to integers on the way back to the client, so
/// the token count is returned as a string.
const TAKE_TOKEN_SCRIPT: &str = r"
local capacity = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl_ms = tonumber(ARGV[5])

local state = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
  tokens = capacity
  ts = now
end

local elapsed = now - ts
if elapsed < 0 then elapsed = 0 end
tokens = math.min(capacity, tokens + elapsed * limit / window)

local allowed = 0
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
  redis.call('HINCRBY', KEYS[1], 'allowed', 1)
else
  redis.call('HINCRBY', KEYS[1], 'blocked', 1)
end

redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'ts', tostring(now))
redis.call('PEXPIRE', KEYS[1], ttl_ms)
return {allowed, tostring(tokens)}
";

/// Cache backend on a shared Redis server.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    take_token: Script,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to the Redis server at `url`.
    ///
    /// The connection manager reconnects on its own after failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis");

        Ok(Self {
            conn,
            take_token: Script::new(TAKE_TOKEN_SCRIPT),
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let () = conn.pset_ex(key, value, ttl_ms).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let () = conn.del(keys).await?;
        Ok(())
    }

    async fn take_token(&self, key: &str, spec: BucketSpec, now_ms: i64) -> Result<TokenTake> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(spec.full_refill().as_millis()).unwrap_or(u64::MAX);

        let (allowed, tokens): (i64, String) = self
            .take_token
            .key(key)
            .arg(spec.capacity)
            .arg(spec.limit_per_window)
            .arg(spec.window_ms)
            .arg(now_ms)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        let tokens = tokens
            .parse::<f64>()
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        Ok(TokenTake {
            allowed: allowed == 1,
            tokens,
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
