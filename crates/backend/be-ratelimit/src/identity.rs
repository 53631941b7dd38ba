use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use be_auth_core::{Claims, JwtConfig};

use crate::config::UserKeyStrategy;

pub const DEFAULT_USER_ROLE: &str = "user";
pub const ANONYMOUS_ROLE: &str = "ip";
pub const UNKNOWN_ADDR: &str = "unknown";

/// The quota key a request is counted against and the role tier used to
/// select its limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key: String,
    pub role: String,
}

/// A caller whose subject was authenticated, either upstream or by the
/// guard's own signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub subject: String,
    pub role: String,
}

impl Caller {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            role: claims.role.to_string(),
        }
    }

    /// Verifies `token` and reads its tier. Tokens that fail verification
    /// yield no caller at all.
    pub fn from_token(jwt: &JwtConfig, token: &str) -> Option<Self> {
        let subject = jwt.verify_subject(token).ok()?;
        let role = unverified_role_hint(token).unwrap_or_else(|| DEFAULT_USER_ROLE.to_owned());
        Some(Self { subject, role })
    }
}

/// Non-authoritative lookup of the `role` (or `tier`) claim of a JWT payload.
///
/// The signature is not checked here. Only read it from a token whose
/// signature has already been verified; any decode failure yields `None`.
pub fn unverified_role_hint(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let value = serde_json::from_slice::<serde_json::Value>(&bytes).ok()?;

    let string_claim = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    string_claim("role").or_else(|| string_claim("tier"))
}

/// Picks the quota key for a request.
///
/// Without an authenticated caller the request is anonymous: it is keyed on
/// the client address under the `ip` tier. [`UserKeyStrategy::Never`] keys
/// on the address even for an authenticated caller but keeps their tier.
pub fn resolve_identity(
    strategy: UserKeyStrategy,
    caller: Option<&Caller>,
    client_addr: &str,
) -> Identity {
    let Some(caller) = caller else {
        return Identity {
            key: format!("ip:{client_addr}"),
            role: ANONYMOUS_ROLE.to_owned(),
        };
    };

    let key = match strategy {
        UserKeyStrategy::Never => format!("ip:{client_addr}"),
        UserKeyStrategy::Always | UserKeyStrategy::AuthOnly => {
            format!("user:{}:{}", caller.subject, caller.role)
        }
    };
    Identity {
        key,
        role: caller.role.clone(),
    }
}
