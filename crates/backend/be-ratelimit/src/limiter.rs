use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Quota;
use crate::counters::{Consumption, CounterStore};
use crate::error::RateLimitError;
use crate::rules::LimiterKey;

/// A quota bound to a counter namespace.
#[derive(Clone)]
pub struct Limiter {
    namespace: String,
    quota: Quota,
    store: Arc<dyn CounterStore>,
}

impl Limiter {
    pub fn new(key: &LimiterKey, quota: Quota, store: Arc<dyn CounterStore>) -> Self {
        Self {
            namespace: format!("rl:{key}"),
            quota,
            store,
        }
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Consumes one point for `identity` in this limiter's namespace.
    pub async fn consume(&self, identity: &str) -> Result<Consumption, RateLimitError> {
        let key = format!("{}:{identity}", self.namespace);
        self.store.consume(&key, self.quota.window).await
    }
}

/// Lazily built limiters keyed by rule scope and role tier.
pub struct LimiterCache {
    limiters: DashMap<LimiterKey, Limiter>,
    store: Arc<dyn CounterStore>,
}

impl LimiterCache {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            limiters: DashMap::new(),
            store,
        }
    }

    pub fn get_or_create(&self, key: &LimiterKey, quota: Quota) -> Limiter {
        if let Some(limiter) = self.limiters.get(key) {
            return limiter.clone();
        }
        self.limiters
            .entry(key.clone())
            .or_insert_with(|| Limiter::new(key, quota, Arc::clone(&self.store)))
            .clone()
    }

    pub fn evict(&self, key: &LimiterKey) -> bool {
        self.limiters.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }
}
