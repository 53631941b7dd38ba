//! Client for the Chapa checkout API.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PaymentConfig;
use crate::error::PaymentError;

pub const CURRENCY: &str = "ETB";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub amount: Decimal,
    pub currency: String,
    pub email: String,
    pub first_name: String,
    pub tx_ref: String,
    pub callback_url: String,
}

#[derive(Debug, Clone)]
pub struct Checkout {
    pub checkout_url: String,
    /// The provider's `data` object, untouched.
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    /// Provider-reported status, e.g. `success`, `pending` or `failed`.
    pub status: Option<String>,
    pub payload: Value,
}

impl VerifiedTransaction {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout, PaymentError>;

    async fn verify(&self, tx_ref: &str) -> Result<VerifiedTransaction, PaymentError>;

    fn public_key(&self) -> Option<&str>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    message: Option<Value>,
    data: Option<Value>,
}

impl Envelope {
    fn message(&self) -> Option<String> {
        match self.message.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

pub struct ChapaClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: Option<SecretString>,
    public_key: Option<String>,
}

impl ChapaClient {
    pub fn from_config(config: &PaymentConfig) -> Result<Self, PaymentError> {
        let http = reqwest::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.chapa_base_url.clone(),
            secret_key: config
                .chapa_secret_key
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_owned())),
            public_key: config.chapa_public_key.clone(),
        })
    }

    fn secret(&self) -> Result<&str, PaymentError> {
        self.secret_key
            .as_ref()
            .map(|s| s.expose_secret())
            .ok_or_else(|| PaymentError::Config("Chapa secret key not configured".into()))
    }

    /// Reads the JSON envelope and insists on a 2xx status and a `data` object.
    async fn read_envelope(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<Value, PaymentError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PaymentError::Gateway(format!("Chapa {operation} failed: {e}")))?;
        let envelope: Option<Envelope> = serde_json::from_slice(&body).ok();

        let data = envelope
            .as_ref()
            .and_then(|e| e.data.clone())
            .filter(|d| !d.is_null());

        match data {
            Some(data) if status.is_success() => Ok(data),
            _ => {
                let message = envelope
                    .as_ref()
                    .and_then(Envelope::message)
                    .unwrap_or_else(|| format!("Chapa {operation} failed"));
                warn!(%status, operation, message = %message, "Chapa rejected request");
                Err(PaymentError::Gateway(message))
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for ChapaClient {
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout, PaymentError> {
        let secret = self.secret()?;
        debug!(tx_ref = %request.tx_ref, "Initializing Chapa transaction");

        let response = self
            .http
            .post(format!("{}/v1/transaction/initialize", self.base_url))
            .bearer_auth(secret)
            .json(request)
            .send()
            .await
            .map_err(|e| PaymentError::Gateway(format!("Chapa initialization failed: {e}")))?;

        let data = Self::read_envelope(response, "initialization").await?;
        let checkout_url = data
            .get("checkout_url")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| PaymentError::Gateway("Chapa response missing checkout_url".into()))?;

        Ok(Checkout {
            checkout_url,
            payload: data,
        })
    }

    async fn verify(&self, tx_ref: &str) -> Result<VerifiedTransaction, PaymentError> {
        let secret = self.secret()?;
        debug!(tx_ref = %tx_ref, "Verifying Chapa transaction");

        let mut url = reqwest::Url::parse(&format!("{}/v1/transaction/verify", self.base_url))
            .map_err(|e| PaymentError::Config(format!("Invalid Chapa base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| PaymentError::Config("Invalid Chapa base URL".into()))?
            .push(tx_ref);

        let response = self
            .http
            .get(url)
            .bearer_auth(secret)
            .send()
            .await
            .map_err(|e| PaymentError::Gateway(format!("Chapa verification failed: {e}")))?;

        let data = Self::read_envelope(response, "verification").await?;
        let status = data
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.to_ascii_lowercase());

        Ok(VerifiedTransaction {
            status,
            payload: data,
        })
    }

    fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    const SECRET: &str = "CHASECK_TEST-secret";

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {SECRET}"))
    }

    async fn spawn_provider() -> String {
        let app = Router::new()
            .route(
                "/v1/transaction/initialize",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    if !authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid API Key"})));
                    }
                    if body["currency"] != "ETB" || body["amount"] != "1000" {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"message": {"amount": ["invalid"]}, "status": "failed", "data": null})),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "message": "Hosted Link",
                            "status": "success",
                            "data": {"checkout_url": format!("https://checkout.chapa.co/{}", body["tx_ref"].as_str().unwrap_or_default())}
                        })),
                    )
                }),
            )
            .route(
                "/v1/transaction/verify/{tx_ref}",
                get(|headers: HeaderMap, Path(tx_ref): Path<String>| async move {
                    if !authorized(&headers) {
                        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid API Key"})));
                    }
                    match tx_ref.as_str() {
                        "tx_paid" => (
                            StatusCode::OK,
                            Json(json!({"message": "Payment details", "status": "success", "data": {"status": "success", "tx_ref": tx_ref, "amount": 1000}})),
                        ),
                        "tx_empty" => (
                            StatusCode::OK,
                            Json(json!({"message": "No data", "status": "success", "data": null})),
                        ),
                        _ => (
                            StatusCode::NOT_FOUND,
                            Json(json!({"message": "Invalid transaction or Transaction not found", "status": "failed", "data": null})),
                        ),
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String, secret: Option<&str>) -> ChapaClient {
        let config = PaymentConfig {
            chapa_base_url: base_url,
            chapa_secret_key: secret.map(|s| SecretString::from(s.to_owned())),
            chapa_public_key: Some("CHAPUBK_TEST-public".into()),
            app_base_url: "http://localhost:5000".into(),
        };
        ChapaClient::from_config(&config).unwrap()
    }

    fn checkout_request(amount: Decimal) -> CheckoutRequest {
        CheckoutRequest {
            amount,
            currency: CURRENCY.into(),
            email: "hana@example.com".into(),
            first_name: "hana".into(),
            tx_ref: "tx_init".into(),
            callback_url: "http://localhost:5000/api/payments/chapa/verify".into(),
        }
    }

    #[tokio::test]
    async fn initialize_returns_checkout_url() {
        let base = spawn_provider().await;
        let checkout = client(base, Some(SECRET))
            .initialize(&checkout_request(dec!(1000)))
            .await
            .unwrap();

        assert_eq!(checkout.checkout_url, "https://checkout.chapa.co/tx_init");
        assert_eq!(checkout.payload["checkout_url"], checkout.checkout_url);
    }

    #[tokio::test]
    async fn initialize_surfaces_provider_message() {
        let base = spawn_provider().await;
        let err = client(base, Some(SECRET))
            .initialize(&checkout_request(dec!(5)))
            .await
            .unwrap_err();

        let PaymentError::Gateway(message) = err else {
            panic!("expected gateway error");
        };
        assert!(message.contains("amount"));
    }

    #[tokio::test]
    async fn missing_secret_fails_before_network() {
        // Nothing listens on this address; a network attempt would be a Gateway error.
        let chapa = client("http://127.0.0.1:9".into(), None);

        let err = chapa.verify("tx_paid").await.unwrap_err();
        assert!(matches!(err, PaymentError::Config(_)));

        let err = chapa
            .initialize(&checkout_request(dec!(1000)))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Config(_)));
    }

    #[tokio::test]
    async fn verify_reads_status() {
        let base = spawn_provider().await;
        let verified = client(base, Some(SECRET)).verify("tx_paid").await.unwrap();
        assert!(verified.is_success());
        assert_eq!(verified.payload["tx_ref"], "tx_paid");
    }

    #[tokio::test]
    async fn verify_rejects_missing_data_and_error_status() {
        let base = spawn_provider().await;
        let chapa = client(base, Some(SECRET));

        let err = chapa.verify("tx_empty").await.unwrap_err();
        assert!(matches!(err, PaymentError::Gateway(_)));

        let err = chapa.verify("tx_unknown").await.unwrap_err();
        let PaymentError::Gateway(message) = err else {
            panic!("expected gateway error");
        };
        assert_eq!(message, "Invalid transaction or Transaction not found");
    }

    #[tokio::test]
    async fn wrong_secret_is_a_gateway_error() {
        let base = spawn_provider().await;
        let err = client(base, Some("wrong"))
            .verify("tx_paid")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Gateway(_)));
    }

    #[test]
    fn exposes_public_key() {
        let chapa = client("http://127.0.0.1:9".into(), Some(SECRET));
        assert_eq!(chapa.public_key(), Some("CHAPUBK_TEST-public"));
    }
}
