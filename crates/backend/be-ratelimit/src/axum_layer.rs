use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use be_auth_core::Claims;
use tracing::{error, warn};

use crate::guard::{Decision, IngressGuard, RateLimitHeaders, RequestContext};
use crate::identity::UNKNOWN_ADDR;

pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

const REJECTION_MESSAGE: &str = "Too many requests, please try again later.";

/// Axum middleware that consults the [`IngressGuard`] before dispatch.
pub async fn rate_limit_middleware(
    State(guard): State<Arc<IngressGuard>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let client_addr = client_addr(&req);
    let bearer_token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_owned);

    let ctx = RequestContext {
        path: &path,
        bearer_token: bearer_token.as_deref(),
        principal: req.extensions().get::<Claims>(),
        client_addr: &client_addr,
    };

    let decision = match guard.check(&ctx).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(error = %e, path = %path, "Rate limit check failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(serde_json::json!({"error": "Rate limiter unavailable"})),
            )
                .into_response();
        }
    };

    match decision {
        Decision::Exempt => next.run(req).await,
        Decision::Allow(headers) => {
            let mut response = next.run(req).await;
            apply_headers(response.headers_mut(), &headers);
            response
        }
        Decision::Reject(headers) => {
            warn!(path = %path, client = %client_addr, "Rejected request over quota");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({"message": REJECTION_MESSAGE})),
            )
                .into_response();
            apply_headers(response.headers_mut(), &headers);
            response
        }
    }
}

/// Peer address, then the first `X-Forwarded-For` hop, then `unknown`.
fn client_addr(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| UNKNOWN_ADDR.to_owned())
}

fn apply_headers(headers: &mut HeaderMap, rate: &RateLimitHeaders) {
    match rate {
        RateLimitHeaders::Unlimited => {
            let unlimited = HeaderValue::from_static("unlimited");
            headers.insert(LIMIT_HEADER, unlimited.clone());
            headers.insert(REMAINING_HEADER, unlimited);
        }
        RateLimitHeaders::Limited {
            limit,
            remaining,
            reset_at,
            retry_after,
        } => {
            headers.insert(LIMIT_HEADER, HeaderValue::from(*limit));
            headers.insert(REMAINING_HEADER, HeaderValue::from(*remaining));
            headers.insert(RESET_HEADER, HeaderValue::from(*reset_at));
            if let Some(secs) = retry_after {
                headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(*secs));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    use be_auth_core::{JwtConfig, Role};
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;
    use crate::config::{Quota, RateLimitConfig, parse_role_quotas};
    use crate::counters::MemoryCounters;

    const SECRET: &[u8] = b"layer-secret";

    fn app(config: RateLimitConfig) -> Router {
        let guard = Arc::new(IngressGuard::new(
            config,
            Arc::new(MemoryCounters::new()),
            Some(JwtConfig::new(SECRET)),
        ));
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/payments/me", get(|| async { "[]" }))
            .layer(axum::middleware::from_fn_with_state(
                guard,
                rate_limit_middleware,
            ))
    }

    fn request(path: &str, forwarded_for: &str) -> Request {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap()
    }

    fn small_config() -> RateLimitConfig {
        RateLimitConfig {
            default_quota: Quota::new(2, 60),
            exempt_paths: vec!["/health".into()],
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test]
    async fn allowed_responses_carry_quota_headers() {
        let app = app(small_config());
        let response = app
            .oneshot(request("/api/payments/me", "1.2.3.4"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[&LIMIT_HEADER], "2");
        assert_eq!(response.headers()[&REMAINING_HEADER], "1");
        assert!(response.headers().contains_key(&RESET_HEADER));
        assert!(!response.headers().contains_key("retry-after"));
    }

    #[tokio::test]
    async fn over_quota_is_rejected_with_retry_hint() {
        let app = app(small_config());
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("/api/payments/me", "1.2.3.4, 10.0.0.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(request("/api/payments/me", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[&REMAINING_HEADER], "0");
        let retry_after: u64 = response.headers()["retry-after"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 1);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], REJECTION_MESSAGE);
    }

    #[tokio::test]
    async fn exempt_route_has_no_quota_headers() {
        let app = app(small_config());
        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("/health", "1.2.3.4"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key(&LIMIT_HEADER));
        }
    }

    fn admin_token(secret: &[u8]) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "11111111-1111-1111-1111-111111111111".to_string(),
            username: "hana".to_string(),
            email: "hana@example.com".to_string(),
            exp: now + 3600,
            iat: now,
            role: Role::Admin,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn bearer(path: &str, token: &str) -> Request {
        Request::builder()
            .uri(path)
            .header("authorization", format!("Bearer {token}"))
            .header("x-forwarded-for", "192.0.2.44")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn unlimited_tier_reports_unlimited() {
        let mut config = small_config();
        config.role_quotas = parse_role_quotas("admin:unlimited", config.default_quota);
        let app = app(config);
        let token = admin_token(SECRET);

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(bearer("/api/payments/me", &token))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[&LIMIT_HEADER], "unlimited");
            assert_eq!(response.headers()[&REMAINING_HEADER], "unlimited");
        }
    }

    #[tokio::test]
    async fn badly_signed_admin_token_gets_the_address_budget() {
        let mut config = small_config();
        config.role_quotas = parse_role_quotas("admin:unlimited", config.default_quota);
        let app = app(config);
        let forged = admin_token(b"someone-else");

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(bearer("/api/payments/me", &forged))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[&LIMIT_HEADER], "2");
        }
        let response = app
            .oneshot(bearer("/api/payments/me", &forged))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
