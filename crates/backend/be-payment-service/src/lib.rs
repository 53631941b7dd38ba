//! Course payments over the Chapa gateway: checkout initiation,
//! verification with an atomic enrollment and payout fan-out, and the admin
//! payout ledger.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use be_auth_core::JwtConfig;
use be_remote_db::SettlementStore;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::debug;

mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod payout;
pub mod service;
pub mod settlement;
pub mod split;
pub mod types;

use service::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let jwt_config = state.jwt_config.clone();

    let public_routes = Router::new().route(
        "/api/payments/chapa/verify",
        get(handlers::verify_payment).post(handlers::verify_payment),
    );

    let authed_routes = Router::new()
        .route(
            "/api/payments",
            post(handlers::create_payment).get(handlers::list_payments),
        )
        .route("/api/payments/chapa/init", post(handlers::initiate_payment))
        .route("/api/payments/me", get(handlers::list_my_payments))
        .route(
            "/api/payments/{id}",
            get(handlers::get_payment)
                .put(handlers::update_payment)
                .delete(handlers::delete_payment),
        );

    let admin_routes = Router::new()
        .route(
            "/api/payments/unpaid-payouts",
            get(handlers::list_unpaid_payouts),
        )
        .route(
            "/api/payments/{id}/mark-paid",
            post(handlers::mark_payout_paid),
        );

    public_routes
        .merge(authed_routes)
        .merge(admin_routes)
        .layer(Extension(jwt_config))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub fn init_payment_service(
    store: Arc<dyn SettlementStore>,
    jwt_config: Arc<JwtConfig>,
) -> Result<Router> {
    debug!("Initializing payment service");

    let state = Arc::new(
        AppState::from_env(store, jwt_config).context("Failed to create payment service state")?,
    );

    Ok(create_router(state))
}

pub use config::PaymentConfig;
pub use error::PaymentError;
pub use gateway::{ChapaClient, PaymentGateway};
pub use payout::PayoutLedger;
pub use settlement::{SettlementService, generate_tx_ref};
pub use split::{Split, compute_split};

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use be_auth_core::{Claims, Role};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::Principal;
    use crate::settlement::tests::{Fixture, fixture, principal};

    const SECRET: &[u8] = b"payments-test-secret";

    fn token_for(principal: &Principal) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: principal.id.to_string(),
            username: principal.username.clone(),
            email: principal.email.clone(),
            exp: now + 3600,
            iat: now,
            role: principal.role,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    async fn app() -> (Router, Arc<Fixture>) {
        let f = Arc::new(fixture().await);
        let config = PaymentConfig::from_lookup(|_| None).unwrap();
        let state = AppState::new(
            Arc::new(f.store.clone()),
            f.gateway.clone(),
            config,
            Arc::new(JwtConfig::new(SECRET)),
        );
        (create_router(Arc::new(state)), f)
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn initiate_then_verify_over_http() {
        let (app, f) = app().await;
        let token = token_for(&f.student);

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/payments/chapa/init",
                Some(&token),
                Some(json!({ "course": f.course.id, "amount": "1000", "type": "one-time" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payment"]["status"], "pending");
        assert_eq!(body["chapa_public_key"], "CHAPUBK_TEST-public");
        let tx_ref = body["payment"]["tx_ref"].as_str().unwrap().to_string();
        assert!(body["checkout_url"].as_str().unwrap().ends_with(&tx_ref));

        let sent = f.gateway.initialized.lock().unwrap().clone();
        assert_eq!(
            sent[0].callback_url,
            "http://localhost:5000/api/payments/chapa/verify"
        );

        f.gateway.set_status(&tx_ref, "success");
        let (status, body) = send(
            &app,
            request(
                "GET",
                &format!("/api/payments/chapa/verify?tx_ref={tx_ref}"),
                None,
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payment"]["status"], "success");
        assert_eq!(body["payment"]["platform_share"], "200");
        assert_eq!(body["payment"]["instructor_share"], "800");
        assert_eq!(body["chapa"]["status"], "success");
    }

    #[tokio::test]
    async fn verify_reads_tx_ref_from_body() {
        let (app, f) = app().await;
        f.service
            .create(
                crate::settlement::PaymentRequest {
                    course: Some(f.course.id),
                    amount: rust_decimal_macros::dec!(100),
                    kind: be_remote_db::PaymentKind::OneTime,
                },
                "tx_body".into(),
                &f.student,
            )
            .await
            .unwrap();
        f.gateway.set_status("tx_body", "failed");

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/payments/chapa/verify",
                None,
                Some(json!({ "tx_ref": "tx_body" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payment"]["status"], "failed");
    }

    #[tokio::test]
    async fn verify_without_tx_ref_is_bad_request() {
        let (app, _f) = app().await;
        let (status, body) = send(
            &app,
            request("POST", "/api/payments/chapa/verify", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "tx_ref is required");
    }

    #[tokio::test]
    async fn verify_unknown_reference_is_not_found() {
        let (app, _f) = app().await;
        let (status, _) = send(
            &app,
            request("GET", "/api/payments/chapa/verify?tx_ref=tx_abc", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn authenticated_routes_require_a_token() {
        let (app, _f) = app().await;
        let (status, _) = send(&app, request("GET", "/api/payments/me", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            request("GET", "/api/payments/me", Some("not-a-jwt"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_returns_created_and_rejects_duplicates() {
        let (app, f) = app().await;
        let token = token_for(&f.student);
        let body = json!({ "course": f.course.id, "tx_ref": "tx_manual", "amount": "250", "type": "one-time" });

        let (status, created) = send(
            &app,
            request("POST", "/api/payments", Some(&token), Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["tx_ref"], "tx_manual");

        let (status, _) = send(
            &app,
            request("POST", "/api/payments", Some(&token), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, mine) = send(
            &app,
            request("GET", "/api/payments/me", Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine.as_array().unwrap().len(), 1);

        let id = created["id"].as_str().unwrap();
        let (status, _) = send(
            &app,
            request(
                "GET",
                &format!("/api/payments/{id}"),
                Some(&token_for(&principal(Role::Student))),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            request("GET", "/api/payments/not-a-uuid", Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn payout_routes_are_admin_only() {
        let (app, f) = app().await;
        let student = token_for(&f.student);
        let admin = token_for(&principal(Role::Admin));

        let (status, _) = send(
            &app,
            request("GET", "/api/payments/unpaid-payouts", Some(&student), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        f.service
            .create(
                crate::settlement::PaymentRequest {
                    course: Some(f.course.id),
                    amount: rust_decimal_macros::dec!(1000),
                    kind: be_remote_db::PaymentKind::OneTime,
                },
                "tx_payout_http".into(),
                &f.student,
            )
            .await
            .unwrap();
        f.gateway.set_status("tx_payout_http", "success");
        let settled = f.service.verify("tx_payout_http").await.unwrap().payment;

        let (status, unpaid) = send(
            &app,
            request("GET", "/api/payments/unpaid-payouts", Some(&admin), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unpaid.as_array().unwrap().len(), 1);

        let uri = format!("/api/payments/{}/mark-paid", settled.id);
        let (status, paid) = send(
            &app,
            request(
                "POST",
                &uri,
                Some(&admin),
                Some(json!({ "payoutTxRef": "bank_42" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paid["payout_status"], "paid");
        assert_eq!(paid["payout_tx_ref"], "bank_42");

        let (status, _) = send(&app, request("POST", &uri, Some(&admin), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn full_listing_is_admin_only() {
        let (app, f) = app().await;
        let student = token_for(&f.student);
        let admin = token_for(&principal(Role::Admin));
        let body = json!({ "course": f.course.id, "tx_ref": "tx_listed", "amount": "100", "type": "one-time" });
        send(&app, request("POST", "/api/payments", Some(&student), Some(body))).await;

        let (status, _) = send(&app, request("GET", "/api/payments", Some(&student), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, all) = send(&app, request("GET", "/api/payments", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(all.as_array().unwrap().len(), 1);
        assert_eq!(all[0]["tx_ref"], "tx_listed");
    }

    #[tokio::test]
    async fn owner_updates_and_deletes_pending_payment() {
        let (app, f) = app().await;
        let owner = token_for(&f.student);
        let stranger = token_for(&principal(Role::Student));
        let body = json!({ "course": f.course.id, "tx_ref": "tx_mut", "amount": "100", "type": "one-time" });
        let (_, created) =
            send(&app, request("POST", "/api/payments", Some(&owner), Some(body))).await;
        let uri = format!("/api/payments/{}", created["id"].as_str().unwrap());

        let (status, _) = send(
            &app,
            request("PUT", &uri, Some(&stranger), Some(json!({ "amount": "5" }))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, request("PUT", &uri, Some(&owner), Some(json!({})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, updated) = send(
            &app,
            request(
                "PUT",
                &uri,
                Some(&owner),
                Some(json!({ "amount": "150", "type": "subscription", "status": "success" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["amount"], "150");
        assert_eq!(updated["type"], "subscription");
        assert_eq!(updated["status"], "pending");

        let (status, _) = send(&app, request("DELETE", &uri, Some(&stranger), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, deleted) = send(&app, request("DELETE", &uri, Some(&owner), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["message"], "Payment deleted");

        let (status, _) = send(&app, request("GET", &uri, Some(&owner), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn settled_payment_cannot_be_changed_over_http() {
        let (app, f) = app().await;
        let admin = token_for(&principal(Role::Admin));
        f.service
            .create(
                crate::settlement::PaymentRequest {
                    course: Some(f.course.id),
                    amount: rust_decimal_macros::dec!(1000),
                    kind: be_remote_db::PaymentKind::OneTime,
                },
                "tx_locked".into(),
                &f.student,
            )
            .await
            .unwrap();
        f.gateway.set_status("tx_locked", "success");
        let settled = f.service.verify("tx_locked").await.unwrap().payment;
        let uri = format!("/api/payments/{}", settled.id);

        let (status, _) = send(
            &app,
            request("PUT", &uri, Some(&admin), Some(json!({ "amount": "1" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, request("DELETE", &uri, Some(&admin), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, stored) = send(&app, request("GET", &uri, Some(&admin), None)).await;
        assert_eq!(stored["amount"], "1000");
        assert_eq!(stored["payout_credited"], true);
    }
}
