use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use be_remote_db::{Payment, PaymentChanges};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser};
use crate::error::PaymentError;
use crate::service::AppState;
use crate::settlement::PaymentRequest;
use crate::types::{
    CreatePaymentRequest, InitiatePaymentRequest, InitiatePaymentResponse, MarkPaidRequest,
    UpdatePaymentRequest, VerifyParams, VerifyPaymentResponse,
};

/// Parses an optional JSON body; an empty body yields the default value.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, PaymentError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| PaymentError::Validation(format!("Invalid request body: {e}")))
}

fn parse_id(raw: &str) -> Result<Uuid, PaymentError> {
    Uuid::parse_str(raw).map_err(|_| PaymentError::Validation(format!("Invalid payment id: {raw}")))
}

// ---------------------------------------------------------------------------
// POST /api/payments
// ---------------------------------------------------------------------------

pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), PaymentError> {
    let payment = state
        .settlement
        .create(
            PaymentRequest {
                course: body.course,
                amount: body.amount,
                kind: body.kind,
            },
            body.tx_ref,
            &principal,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

// ---------------------------------------------------------------------------
// GET /api/payments
// ---------------------------------------------------------------------------

pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<Vec<Payment>>, PaymentError> {
    Ok(Json(state.settlement.all_payments().await?))
}

// ---------------------------------------------------------------------------
// POST /api/payments/chapa/init
// ---------------------------------------------------------------------------

/// Records a pending payment and returns the Chapa checkout URL.
pub async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Json(body): Json<InitiatePaymentRequest>,
) -> Result<Json<InitiatePaymentResponse>, PaymentError> {
    let callback_url = body
        .callback_url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| state.config.default_callback_url());

    let initiation = state
        .settlement
        .initiate(
            PaymentRequest {
                course: body.course,
                amount: body.amount,
                kind: body.kind,
            },
            &principal,
            &callback_url,
        )
        .await?;

    Ok(Json(InitiatePaymentResponse {
        payment: initiation.payment,
        checkout_url: initiation.checkout_url,
        chapa_data: initiation.provider_payload,
        chapa_public_key: initiation.public_key,
    }))
}

// ---------------------------------------------------------------------------
// GET|POST /api/payments/chapa/verify?tx_ref=...
// ---------------------------------------------------------------------------

/// Provider callback and client-driven verification. Unauthenticated: the
/// outcome is taken from Chapa, never from the caller.
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyParams>,
    body: Bytes,
) -> Result<Json<VerifyPaymentResponse>, PaymentError> {
    let tx_ref = match query.tx_ref.filter(|r| !r.is_empty()) {
        Some(tx_ref) => Some(tx_ref),
        None => optional_json::<VerifyParams>(&body)?
            .tx_ref
            .filter(|r| !r.is_empty()),
    }
    .ok_or_else(|| PaymentError::Validation("tx_ref is required".into()))?;

    debug!(tx_ref = %tx_ref, "Verifying payment");
    let verification = state.settlement.verify(&tx_ref).await?;

    Ok(Json(VerifyPaymentResponse {
        chapa: verification.provider_payload,
        payment: verification.payment,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/payments/unpaid-payouts
// ---------------------------------------------------------------------------

pub async fn list_unpaid_payouts(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<Vec<Payment>>, PaymentError> {
    Ok(Json(state.payouts.unpaid_payouts().await?))
}

// ---------------------------------------------------------------------------
// POST /api/payments/{id}/mark-paid
// ---------------------------------------------------------------------------

pub async fn mark_payout_paid(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Payment>, PaymentError> {
    let id = parse_id(&id)?;
    let request: MarkPaidRequest = optional_json(&body)?;
    debug!(payment_id = %id, admin_id = %admin.id, "Marking payout as paid");
    Ok(Json(state.payouts.mark_paid(id, request.payout_tx_ref).await?))
}

// ---------------------------------------------------------------------------
// GET /api/payments/me
// ---------------------------------------------------------------------------

pub async fn list_my_payments(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<Payment>>, PaymentError> {
    Ok(Json(state.settlement.payments_for(principal.id).await?))
}

// ---------------------------------------------------------------------------
// GET /api/payments/{id}
// ---------------------------------------------------------------------------

pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Payment>, PaymentError> {
    let id = parse_id(&id)?;
    Ok(Json(state.settlement.payment(id, &principal).await?))
}

// ---------------------------------------------------------------------------
// PUT /api/payments/{id}
// ---------------------------------------------------------------------------

pub async fn update_payment(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdatePaymentRequest>,
) -> Result<Json<Payment>, PaymentError> {
    let id = parse_id(&id)?;
    let changes = PaymentChanges::from(body);
    if changes.is_empty() {
        return Err(PaymentError::Validation("No updatable fields provided".into()));
    }
    Ok(Json(
        state
            .settlement
            .update_payment(id, changes, &principal)
            .await?,
    ))
}

// ---------------------------------------------------------------------------
// DELETE /api/payments/{id}
// ---------------------------------------------------------------------------

pub async fn delete_payment(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, PaymentError> {
    let id = parse_id(&id)?;
    state.settlement.delete_payment(id, &principal).await?;
    Ok(Json(serde_json::json!({ "message": "Payment deleted" })))
}
