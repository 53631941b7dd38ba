//! Multi-tier request quotas for the HTTP surface.
//!
//! A request is matched to a rule (exempt prefix, route override, role tier,
//! default budget), keyed by verified user or client address, and counted in
//! a fixed window held either in process or in Redis.

mod axum_layer;
mod config;
mod counters;
mod error;
mod guard;
mod identity;
mod limiter;
mod path;
#[cfg(feature = "redis")]
mod redis_store;
mod rules;

pub use axum_layer::{LIMIT_HEADER, REMAINING_HEADER, RESET_HEADER, rate_limit_middleware};
pub use config::{Quota, RateLimitConfig, RoleQuota, RouteQuota, UserKeyStrategy};
pub use counters::{Consumption, CounterStore, MemoryCounters, connect_counter_store};
pub use error::RateLimitError;
pub use guard::{Decision, IngressGuard, RateLimitHeaders, RequestContext};
pub use identity::{Caller, Identity, resolve_identity, unverified_role_hint};
pub use limiter::{Limiter, LimiterCache};
pub use path::normalize_path;
#[cfg(feature = "redis")]
pub use redis_store::RedisCounters;
pub use rules::{LimiterKey, LimiterScope, Resolution};
