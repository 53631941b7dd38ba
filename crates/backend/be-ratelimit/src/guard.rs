use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use be_auth_core::{Claims, JwtConfig};
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::counters::{CounterStore, connect_counter_store};
use crate::error::RateLimitError;
use crate::identity::{Caller, resolve_identity};
use crate::limiter::LimiterCache;
use crate::rules::{self, Resolution};

/// What the guard needs to know about an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub path: &'a str,
    pub bearer_token: Option<&'a str>,
    /// Principal already authenticated upstream, if any.
    pub principal: Option<&'a Claims>,
    pub client_addr: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitHeaders {
    Unlimited,
    Limited {
        limit: u32,
        remaining: u64,
        /// Unix timestamp (seconds) at which the window closes.
        reset_at: u64,
        /// Set only on rejection.
        retry_after: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Exempt,
    Allow(RateLimitHeaders),
    Reject(RateLimitHeaders),
}

pub struct IngressGuard {
    config: RateLimitConfig,
    limiters: LimiterCache,
    jwt: Option<JwtConfig>,
}

impl IngressGuard {
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn CounterStore>,
        jwt: Option<JwtConfig>,
    ) -> Self {
        Self {
            config,
            limiters: LimiterCache::new(store),
            jwt,
        }
    }

    /// Selects the counter backend from `config.redis_url` once and keeps it.
    pub async fn connect(config: RateLimitConfig, jwt: Option<JwtConfig>) -> Self {
        let store = connect_counter_store(config.redis_url.as_deref()).await;
        Self::new(config, store, jwt)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn limiters(&self) -> &LimiterCache {
        &self.limiters
    }

    pub async fn check(&self, ctx: &RequestContext<'_>) -> Result<Decision, RateLimitError> {
        let caller = match (ctx.principal, &self.jwt, ctx.bearer_token) {
            (Some(claims), _, _) => Some(Caller::from_claims(claims)),
            (None, Some(jwt), Some(token)) => Caller::from_token(jwt, token),
            _ => None,
        };

        let identity = resolve_identity(
            self.config.user_key_strategy,
            caller.as_ref(),
            ctx.client_addr,
        );

        let (key, quota) = match rules::resolve(&self.config, ctx.path, &identity.role) {
            Resolution::Exempt => return Ok(Decision::Exempt),
            Resolution::Unlimited => return Ok(Decision::Allow(RateLimitHeaders::Unlimited)),
            Resolution::Limited { key, quota } => (key, quota),
        };

        let limiter = self.limiters.get_or_create(&key, quota);
        let consumption = limiter.consume(&identity.key).await?;

        let points = u64::from(quota.points);
        let seconds_left = consumption.ms_before_next.div_ceil(1000);
        let reset_at = unix_now() + seconds_left;

        if consumption.consumed > points {
            debug!(
                limiter = %key,
                identity = %identity.key,
                consumed = consumption.consumed,
                "Rate limit exceeded"
            );
            return Ok(Decision::Reject(RateLimitHeaders::Limited {
                limit: quota.points,
                remaining: 0,
                reset_at,
                retry_after: Some(seconds_left.max(1)),
            }));
        }

        Ok(Decision::Allow(RateLimitHeaders::Limited {
            limit: quota.points,
            remaining: points - consumption.consumed,
            reset_at,
            retry_after: None,
        }))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
