use std::fmt;

use crate::config::{Quota, RateLimitConfig, RoleQuota};
use crate::path::{matches_prefix, normalize_path};

/// Which configured rule a limiter was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LimiterScope {
    Global,
    Route(String),
}

/// Structured cache key for a limiter: the rule scope plus the role tier
/// layered on top of it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    pub scope: LimiterScope,
    pub role: Option<String>,
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(role) = &self.role {
            write!(f, "role:{role}:")?;
        }
        match &self.scope {
            LimiterScope::Global => f.write_str("global"),
            LimiterScope::Route(prefix) => write!(f, "route:{prefix}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exempt path: nothing is consumed.
    Exempt,
    /// Role tier with no budget.
    Unlimited,
    Limited { key: LimiterKey, quota: Quota },
}

/// Resolves the rule for a request path and role hint.
///
/// Order: exempt prefix, longest matching route prefix, role tier layered
/// over the selected scope, default budget.
pub fn resolve(config: &RateLimitConfig, path: &str, role: &str) -> Resolution {
    let normalized = normalize_path(path);

    if config
        .exempt_paths
        .iter()
        .any(|prefix| matches_prefix(&normalized, prefix))
    {
        return Resolution::Exempt;
    }

    let route = config
        .route_quotas
        .iter()
        .filter(|route| matches_prefix(&normalized, &route.prefix))
        .max_by_key(|route| normalize_path(&route.prefix).len());

    let (scope, route_quota) = match route {
        Some(route) => (LimiterScope::Route(route.prefix.clone()), route.quota),
        None => (LimiterScope::Global, config.default_quota),
    };

    match config.role_quotas.get(role) {
        Some(RoleQuota::Unlimited) => Resolution::Unlimited,
        Some(RoleQuota::Limited(quota)) => Resolution::Limited {
            key: LimiterKey {
                scope,
                role: Some(role.to_owned()),
            },
            quota: *quota,
        },
        None => Resolution::Limited {
            key: LimiterKey { scope, role: None },
            quota: route_quota,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_role_quotas, parse_route_quotas};

    fn config() -> RateLimitConfig {
        let default_quota = Quota::new(100, 60);
        RateLimitConfig {
            default_quota,
            exempt_paths: vec!["/health".into(), "/api/payments/chapa/verify".into()],
            route_quotas: parse_route_quotas(
                "/api/auth:20/60;/api/auth/login:5/60",
                default_quota,
            ),
            role_quotas: parse_role_quotas("pro:1000/60;admin:unlimited", default_quota),
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn exempt_paths_bypass_everything() {
        let config = config();
        assert_eq!(resolve(&config, "/health", "admin"), Resolution::Exempt);
        assert_eq!(
            resolve(&config, "/api/payments/chapa/verify?tx_ref=x", "ip"),
            Resolution::Exempt
        );
    }

    #[test]
    fn traversal_does_not_reach_an_exemption() {
        let config = config();
        assert!(matches!(
            resolve(&config, "/health/../api/payments", "ip"),
            Resolution::Limited { .. }
        ));
    }

    #[test]
    fn longest_route_prefix_wins() {
        let config = config();
        assert_eq!(
            resolve(&config, "/api/auth/login", "user"),
            Resolution::Limited {
                key: LimiterKey {
                    scope: LimiterScope::Route("/api/auth/login".into()),
                    role: None
                },
                quota: Quota::new(5, 60),
            }
        );
        assert_eq!(
            resolve(&config, "/api/auth/register", "user"),
            Resolution::Limited {
                key: LimiterKey {
                    scope: LimiterScope::Route("/api/auth".into()),
                    role: None
                },
                quota: Quota::new(20, 60),
            }
        );
    }

    #[test]
    fn role_quota_layers_on_route_scope() {
        let config = config();
        let resolution = resolve(&config, "/api/auth/login", "pro");
        let Resolution::Limited { key, quota } = resolution else {
            panic!("expected a limited resolution");
        };
        assert_eq!(quota, Quota::new(1000, 60));
        assert_eq!(key.to_string(), "role:pro:route:/api/auth/login");
    }

    #[test]
    fn unlimited_role_skips_consumption() {
        assert_eq!(
            resolve(&config(), "/api/payments", "admin"),
            Resolution::Unlimited
        );
    }

    #[test]
    fn falls_back_to_default_budget() {
        let resolution = resolve(&config(), "/api/payments/me", "user");
        let Resolution::Limited { key, quota } = resolution else {
            panic!("expected a limited resolution");
        };
        assert_eq!(quota, Quota::new(100, 60));
        assert_eq!(key.to_string(), "global");
    }
}
