use std::collections::HashMap;
use std::time::Duration;

use crate::error::RateLimitError;

pub const DEFAULT_POINTS: u32 = 100;
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// A point budget that refills completely once per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub points: u32,
    pub window: Duration,
}

impl Quota {
    pub fn new(points: u32, window_secs: u64) -> Self {
        Self {
            points,
            window: Duration::from_secs(window_secs),
        }
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::new(DEFAULT_POINTS, DEFAULT_WINDOW_SECS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleQuota {
    Limited(Quota),
    Unlimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteQuota {
    pub prefix: String,
    pub quota: Quota,
}

/// Which identity a quota is tracked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserKeyStrategy {
    /// Key on the user whenever a verified identity is available.
    Always,
    /// Always key on the network address.
    Never,
    /// Key on the user only for authenticated requests. Keys the same way
    /// as `Always`, since neither accepts an unverified subject.
    #[default]
    AuthOnly,
}

impl std::str::FromStr for UserKeyStrategy {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "auth-only" | "auth_only" => Ok(Self::AuthOnly),
            other => Err(RateLimitError::Config(format!(
                "unknown user key strategy '{other}' (expected always, never or auth-only)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    pub default_quota: Quota,
    pub exempt_paths: Vec<String>,
    pub route_quotas: Vec<RouteQuota>,
    pub role_quotas: HashMap<String, RoleQuota>,
    pub user_key_strategy: UserKeyStrategy,
    pub redis_url: Option<String>,
}

impl RateLimitConfig {
    /// Reads the `RATE_LIMIT_*` and `REDIS_URL` environment variables.
    pub fn from_env() -> Result<Self, RateLimitError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RateLimitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let points = lookup("RATE_LIMIT_POINTS")
            .and_then(|v| parse_positive::<u32>(&v))
            .unwrap_or(DEFAULT_POINTS);
        let window_secs = lookup("RATE_LIMIT_DURATION")
            .and_then(|v| parse_positive::<u64>(&v))
            .unwrap_or(DEFAULT_WINDOW_SECS);
        let default_quota = Quota::new(points, window_secs);

        let user_key_strategy = match lookup("RATE_LIMIT_USER_KEY_STRATEGY") {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => UserKeyStrategy::default(),
        };

        Ok(Self {
            default_quota,
            exempt_paths: parse_exempt_paths(&lookup("RATE_LIMIT_EXEMPT").unwrap_or_default()),
            route_quotas: parse_route_quotas(
                &lookup("RATE_LIMIT_ROUTES").unwrap_or_default(),
                default_quota,
            ),
            role_quotas: parse_role_quotas(
                &lookup("RATE_LIMIT_ROLE_QUOTAS").unwrap_or_default(),
                default_quota,
            ),
            user_key_strategy,
            redis_url: lookup("REDIS_URL").filter(|s| !s.trim().is_empty()),
        })
    }
}

fn parse_positive<T>(raw: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    raw.trim()
        .parse::<T>()
        .ok()
        .filter(|n| *n > T::default())
}

/// `points/seconds`; a missing or unusable half falls back to `default`.
fn parse_quota(quota_def: &str, default: Quota) -> Quota {
    let (points, window) = match quota_def.split_once('/') {
        Some((p, d)) => (p, Some(d)),
        None => (quota_def, None),
    };
    let points = parse_positive::<u32>(points).unwrap_or(default.points);
    let window = window
        .and_then(parse_positive::<u64>)
        .map(Duration::from_secs)
        .unwrap_or(default.window);
    Quota { points, window }
}

/// Comma-separated path prefixes.
pub fn parse_exempt_paths(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `path:points/seconds` entries separated by `;`.
pub fn parse_route_quotas(raw: &str, default: Quota) -> Vec<RouteQuota> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|def| {
            let (path, quota_def) = def.rsplit_once(':')?;
            let path = path.trim();
            if path.is_empty() || quota_def.trim().is_empty() {
                tracing::warn!(entry = %def, "Skipping malformed route quota");
                return None;
            }
            Some(RouteQuota {
                prefix: path.to_owned(),
                quota: parse_quota(quota_def, default),
            })
        })
        .collect()
}

/// `role:points/seconds` or `role:unlimited` entries separated by `;`.
pub fn parse_role_quotas(raw: &str, default: Quota) -> HashMap<String, RoleQuota> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|def| {
            let (role, quota_def) = def.split_once(':')?;
            let (role, quota_def) = (role.trim(), quota_def.trim());
            if role.is_empty() || quota_def.is_empty() {
                tracing::warn!(entry = %def, "Skipping malformed role quota");
                return None;
            }
            let quota = if quota_def.eq_ignore_ascii_case("unlimited") {
                RoleQuota::Unlimited
            } else {
                RoleQuota::Limited(parse_quota(quota_def, default))
            };
            Some((role.to_owned(), quota))
        })
        .collect()
}
