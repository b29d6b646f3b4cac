//! Redis-backed bucket store.
//!
//! The refill-and-debit step runs as a Lua script inside Redis, which executes
//! scripts one at a time, so every decision costs a single round trip and no
//! two callers can interleave on a key.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info};

use super::BucketStore;
use crate::error::{Result, TollgateError};
use crate::ratelimit::{BucketPolicy, Decision, UNIT_COST};

/// Token bucket step, mirroring `BucketPolicy::apply`.
///
/// KEYS[1] bucket hash with fields `tokens` and `last_refilled`.
/// ARGV: capacity, rate (tokens/s), now (unix micros), cost, ttl (s).
/// Returns `{admitted, remaining}` with `remaining` as a string so fractional
/// balances survive the reply conversion.
///
/// Numbers are formatted explicitly before writing: Lua's default conversion
/// keeps 14 significant digits, which would round microsecond timestamps. The
/// TTL is passed through as received for the same reason.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local record = redis.call("HMGET", key, "tokens", "last_refilled")
local tokens = tonumber(record[1])
local last_refilled = tonumber(record[2])

if tokens == nil or last_refilled == nil then
    tokens = capacity
    last_refilled = now
end

local elapsed = math.max(0, now - last_refilled) / 1000000
local available = math.min(capacity, tokens + elapsed * rate)

local admitted = 0
local remaining = available
if available >= cost then
    admitted = 1
    remaining = available - cost
    tokens = remaining
    last_refilled = math.max(last_refilled, now)
end

redis.call("HSET", key,
    "tokens", string.format("%.17g", tokens),
    "last_refilled", string.format("%.0f", last_refilled))
redis.call("EXPIRE", key, ARGV[5])

return {admitted, string.format("%.17g", remaining)}
"#;

/// Bucket store backed by a Redis server.
///
/// Cloning is cheap; clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("script", &self.script.get_hash())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url` and check that it answers.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        let store = Self::with_connection(conn);
        store.ping().await?;

        info!(url = %url, "Connected to Redis");
        Ok(store)
    }

    /// Wrap an already established connection.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn atomic_apply(
        &self,
        key: &str,
        policy: &BucketPolicy,
        now_micros: i64,
        ttl: Duration,
    ) -> Result<Decision> {
        let mut conn = self.conn.clone();

        // EVALSHA, falling back to EVAL when the script is not cached yet.
        let (admitted, remaining): (i64, String) = self
            .script
            .key(key)
            .arg(policy.capacity())
            .arg(policy.rate())
            .arg(now_micros)
            .arg(UNIT_COST)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        let remaining: f64 = remaining.parse().map_err(|_| {
            TollgateError::UnexpectedReply(format!("non-numeric balance {:?}", remaining))
        })?;

        debug!(key = %key, admitted = admitted == 1, remaining, "Redis bucket applied");

        Ok(Decision {
            admitted: admitted == 1,
            remaining,
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(TollgateError::UnexpectedReply(format!(
                "PING answered {:?}",
                reply
            )));
        }
        Ok(())
    }
}
