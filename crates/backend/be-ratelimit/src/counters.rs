use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::RateLimitError;

/// Result of consuming one point from a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    /// Points consumed in the current window, this request included.
    pub consumed: u64,
    /// Time until the current window closes.
    pub ms_before_next: u64,
}

/// Shared fixed-window counters. `consume` must be an atomic
/// increment-with-expiry per key.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    async fn consume(&self, key: &str, window: Duration) -> Result<Consumption, RateLimitError>;

    fn backend(&self) -> &'static str;
}

const PURGE_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

/// In-process counters. Each key's window is updated under its map shard
/// lock so concurrent requests never lose an increment.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    windows: DashMap<String, Window>,
    calls: AtomicU64,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops windows that have already closed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.windows.retain(|_, window| window.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    async fn consume(&self, key: &str, window: Duration) -> Result<Consumption, RateLimitError> {
        let now = Instant::now();

        let current = {
            let mut entry = self.windows.entry(key.to_owned()).or_insert(Window {
                count: 0,
                expires_at: now + window,
            });
            if entry.expires_at <= now {
                *entry = Window {
                    count: 0,
                    expires_at: now + window,
                };
            }
            entry.count += 1;
            *entry
        };

        if self.calls.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }

        Ok(Consumption {
            consumed: current.count,
            ms_before_next: current
                .expires_at
                .saturating_duration_since(now)
                .as_millis() as u64,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Builds the counter store once at startup.
///
/// With the `redis` feature and a URL configured, a shared store is used if
/// it answers now. Otherwise, and on any connection failure, counting stays
/// in process for the lifetime of the returned handle.
pub async fn connect_counter_store(redis_url: Option<&str>) -> Arc<dyn CounterStore> {
    #[cfg(feature = "redis")]
    if let Some(url) = redis_url {
        match crate::redis_store::RedisCounters::connect(url).await {
            Ok(store) => {
                tracing::info!("Rate limiting backed by redis");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, rate limiting falls back to in-process counters");
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    if redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using in-process counters");
    }

    Arc::new(MemoryCounters::new())
}
