use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;

use crate::counters::{Consumption, CounterStore};
use crate::error::RateLimitError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

// INCR and arm the expiry on the first hit of a window, in one round trip.
const CONSUME_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return { count, ttl }
"#;

/// Fixed-window counters shared between processes through Redis.
#[derive(Clone)]
pub struct RedisCounters {
    conn: ConnectionManager,
    script: Script,
}

impl RedisCounters {
    /// Connects and round-trips a `PING` so an unreachable server is caught
    /// at startup.
    pub async fn connect(url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| RateLimitError::Store("timed out connecting to redis".into()))?
            .map_err(store_err)?;

        let _: String = tokio::time::timeout(
            CONNECT_TIMEOUT,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| RateLimitError::Store("timed out pinging redis".into()))?
        .map_err(store_err)?;

        Ok(Self {
            conn,
            script: Script::new(CONSUME_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounters {
    async fn consume(&self, key: &str, window: Duration) -> Result<Consumption, RateLimitError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis() as u64;

        let mut invocation = self.script.key(key);
        invocation.arg(window_ms);

        let (count, ttl): (u64, i64) =
            tokio::time::timeout(COMMAND_TIMEOUT, invocation.invoke_async(&mut conn))
                .await
                .map_err(|_| RateLimitError::Store("redis command timed out".into()))?
                .map_err(store_err)?;

        Ok(Consumption {
            consumed: count,
            ms_before_next: ttl.max(0) as u64,
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

fn store_err(err: redis::RedisError) -> RateLimitError {
    RateLimitError::Store(err.to_string())
}
