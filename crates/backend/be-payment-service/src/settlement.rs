//! Payment state machine: pending record, gateway checkout, verification
//! and the atomic post-success fan-out.

use std::sync::Arc;

use be_remote_db::{
    NewPayment, Payment, PaymentChanges, PaymentKind, PaymentStatus, PayoutStatus,
    SettlementStore, SettlementTx,
};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics;
use crate::auth::Principal;
use crate::error::PaymentError;
use crate::gateway::{CURRENCY, CheckoutRequest, PaymentGateway};
use crate::split::compute_split;

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub course: Option<Uuid>,
    pub amount: Decimal,
    pub kind: PaymentKind,
}

#[derive(Debug, Clone)]
pub struct Initiation {
    pub payment: Payment,
    pub checkout_url: String,
    pub provider_payload: serde_json::Value,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub provider_payload: serde_json::Value,
    pub payment: Payment,
}

/// Side effects applied by one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FanOut {
    enrolled: bool,
    credited: bool,
}

/// Fresh reference for a gateway transaction: wall-clock millis plus 64
/// random bits.
pub fn generate_tx_ref() -> String {
    let (_, random) = Uuid::new_v4().as_u64_pair();
    format!("chapa_{}_{random:016x}", Utc::now().timestamp_millis())
}

pub struct SettlementService {
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl SettlementService {
    pub fn new(store: Arc<dyn SettlementStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    async fn validate(&self, request: &PaymentRequest) -> Result<(), PaymentError> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(
                "Amount must be greater than zero".into(),
            ));
        }
        if let Some(course_id) = request.course
            && self.store.course(course_id).await?.is_none()
        {
            return Err(PaymentError::Validation(format!(
                "Course not found: {course_id}"
            )));
        }
        Ok(())
    }

    /// Persists a pending payment, then asks the gateway for a checkout URL.
    ///
    /// The pending row is written before the gateway is contacted and is
    /// kept whatever the gateway answers.
    pub async fn initiate(
        &self,
        request: PaymentRequest,
        payer: &Principal,
        callback_url: &str,
    ) -> Result<Initiation, PaymentError> {
        let result = self.initiate_inner(&request, payer, callback_url).await;
        match &result {
            Ok(_) => analytics::track_payment_initiated(
                &request.kind.to_string(),
                request.course.is_some(),
            ),
            Err(e) => analytics::track_payment_initiation_failed(e.kind()),
        }
        result
    }

    async fn initiate_inner(
        &self,
        request: &PaymentRequest,
        payer: &Principal,
        callback_url: &str,
    ) -> Result<Initiation, PaymentError> {
        self.validate(request).await?;

        let tx_ref = generate_tx_ref();
        let new_payment = NewPayment::builder()
            .user_id(payer.id)
            .maybe_course_id(request.course)
            .tx_ref(tx_ref.clone())
            .amount(request.amount)
            .kind(request.kind)
            .build();

        let payment = self
            .store
            .insert_payment(new_payment)
            .await
            .map_err(|e| match PaymentError::from(e) {
                PaymentError::Conflict(msg) => PaymentError::Internal(anyhow::anyhow!(
                    "Generated transaction reference collided: {msg}"
                )),
                other => other,
            })?;
        info!(payment_id = %payment.id, tx_ref = %tx_ref, "Pending payment recorded");

        let checkout = self
            .gateway
            .initialize(&CheckoutRequest {
                amount: request.amount,
                currency: CURRENCY.to_string(),
                email: payer.email.clone(),
                first_name: payer.username.clone(),
                tx_ref,
                callback_url: callback_url.to_string(),
            })
            .await?;

        Ok(Initiation {
            payment,
            checkout_url: checkout.checkout_url,
            provider_payload: checkout.payload,
            public_key: self.gateway.public_key().map(str::to_owned),
        })
    }

    /// Records a payment whose reference was issued outside this service.
    pub async fn create(
        &self,
        request: PaymentRequest,
        tx_ref: String,
        payer: &Principal,
    ) -> Result<Payment, PaymentError> {
        if tx_ref.trim().is_empty() {
            return Err(PaymentError::Validation("tx_ref is required".into()));
        }
        self.validate(&request).await?;

        let payment = self
            .store
            .insert_payment(
                NewPayment::builder()
                    .user_id(payer.id)
                    .maybe_course_id(request.course)
                    .tx_ref(tx_ref)
                    .amount(request.amount)
                    .kind(request.kind)
                    .build(),
            )
            .await
            .map_err(|e| match PaymentError::from(e) {
                PaymentError::Conflict(_) => {
                    PaymentError::Conflict("Transaction reference already exists".into())
                }
                other => other,
            })?;

        info!(payment_id = %payment.id, "Payment created");
        Ok(payment)
    }

    /// Confirms `tx_ref` with the gateway and applies the outcome.
    ///
    /// Safe to repeat: a settled payment is never enrolled or credited twice
    /// and never leaves `success`.
    pub async fn verify(&self, tx_ref: &str) -> Result<Verification, PaymentError> {
        let result = self.verify_inner(tx_ref).await;
        if let Err(e) = &result {
            analytics::track_payment_verification_failed(e.kind());
        }
        result
    }

    async fn verify_inner(&self, tx_ref: &str) -> Result<Verification, PaymentError> {
        if self.store.payment_by_tx_ref(tx_ref).await?.is_none() {
            return Err(PaymentError::NotFound(format!(
                "Payment not found: {tx_ref}"
            )));
        }

        let verified = self.gateway.verify(tx_ref).await?;

        if !verified.is_success() {
            let status = match verified.status.as_deref() {
                Some("pending") => PaymentStatus::Pending,
                _ => PaymentStatus::Failed,
            };
            let payment = self
                .store
                .record_verification_outcome(tx_ref, status)
                .await?;
            info!(tx_ref = %tx_ref, status = %payment.status, "Payment not settled by provider");
            analytics::track_payment_verified(&payment.status.to_string(), false, false);
            return Ok(Verification {
                provider_payload: verified.payload,
                payment,
            });
        }

        let fan_out = self.settle(tx_ref).await?;

        let payment = self
            .store
            .payment_by_tx_ref(tx_ref)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment not found: {tx_ref}")))?;

        info!(
            tx_ref = %tx_ref,
            payment_id = %payment.id,
            enrolled = fan_out.enrolled,
            credited = fan_out.credited,
            "Payment settled"
        );
        analytics::track_payment_verified("success", fan_out.enrolled, fan_out.credited);

        Ok(Verification {
            provider_payload: verified.payload,
            payment,
        })
    }

    /// Runs the fan-out as one unit of work; any failure leaves the store as
    /// it was before the call.
    async fn settle(&self, tx_ref: &str) -> Result<FanOut, PaymentError> {
        let mut tx = self.store.begin().await?;

        match apply_fan_out(&mut *tx, tx_ref).await {
            Ok(fan_out) => {
                tx.commit().await?;
                Ok(fan_out)
            }
            Err(e) => {
                warn!(tx_ref = %tx_ref, error = %e, "Settlement rolled back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Owner or admin only.
    pub async fn payment(&self, id: Uuid, requester: &Principal) -> Result<Payment, PaymentError> {
        self.owned_payment(id, requester, "view").await
    }

    pub async fn payments_for(&self, payer_id: Uuid) -> Result<Vec<Payment>, PaymentError> {
        Ok(self.store.payments_for_user(payer_id).await?)
    }

    pub async fn all_payments(&self) -> Result<Vec<Payment>, PaymentError> {
        Ok(self.store.all_payments().await?)
    }

    /// Edits the course, amount or kind of an unsettled payment. Owner or
    /// admin only.
    pub async fn update_payment(
        &self,
        id: Uuid,
        changes: PaymentChanges,
        requester: &Principal,
    ) -> Result<Payment, PaymentError> {
        self.owned_payment(id, requester, "modify").await?;

        if let Some(amount) = changes.amount
            && amount <= Decimal::ZERO
        {
            return Err(PaymentError::Validation(
                "Amount must be greater than zero".into(),
            ));
        }
        if let Some(course_id) = changes.course_id
            && self.store.course(course_id).await?.is_none()
        {
            return Err(PaymentError::Validation(format!(
                "Course not found: {course_id}"
            )));
        }

        let payment = self
            .store
            .update_payment(id, &changes)
            .await?
            .ok_or_else(|| PaymentError::Conflict("Settled payments cannot be modified".into()))?;

        info!(payment_id = %id, "Payment updated");
        Ok(payment)
    }

    /// Removes an unsettled payment. Owner or admin only.
    pub async fn delete_payment(&self, id: Uuid, requester: &Principal) -> Result<(), PaymentError> {
        self.owned_payment(id, requester, "delete").await?;

        if !self.store.delete_payment(id).await? {
            return Err(PaymentError::Conflict(
                "Settled payments cannot be deleted".into(),
            ));
        }

        info!(payment_id = %id, "Payment deleted");
        Ok(())
    }

    async fn owned_payment(
        &self,
        id: Uuid,
        requester: &Principal,
        action: &str,
    ) -> Result<Payment, PaymentError> {
        let payment = self
            .store
            .payment(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment not found: {id}")))?;

        if payment.user_id != requester.id && !requester.is_admin() {
            return Err(PaymentError::Forbidden(format!(
                "Not authorized to {action} this payment"
            )));
        }
        Ok(payment)
    }
}

async fn apply_fan_out(tx: &mut dyn SettlementTx, tx_ref: &str) -> Result<FanOut, PaymentError> {
    let mut payment = tx
        .payment_for_update(tx_ref)
        .await?
        .ok_or_else(|| PaymentError::NotFound(format!("Payment not found: {tx_ref}")))?;

    let split = compute_split(payment.amount, Decimal::ZERO);
    payment.status = PaymentStatus::Success;
    payment.platform_share = split.platform_share;
    payment.instructor_share = split.instructor_share;
    payment.gateway_fee_estimate = split.gateway_fee_estimate;

    let mut fan_out = FanOut::default();

    if let Some(course_id) = payment.course_id {
        match tx.course(course_id).await? {
            Some(course) => {
                if tx.enrollment(payment.user_id, course_id).await?.is_none() {
                    tx.create_enrollment(payment.user_id, course_id).await?;
                    tx.add_course_student(course_id, payment.user_id).await?;
                    fan_out.enrolled = true;
                }

                if !payment.payout_credited
                    && let Some(instructor_id) = course.instructor_id
                {
                    if tx
                        .credit_instructor(instructor_id, split.instructor_share)
                        .await?
                    {
                        payment.payout_credited = true;
                        payment.payout_status = PayoutStatus::Pending;
                        fan_out.credited = true;
                    } else {
                        warn!(tx_ref = %tx_ref, instructor_id = %instructor_id, "Instructor not found; payout not credited");
                    }
                }
            }
            None => {
                warn!(tx_ref = %tx_ref, course_id = %course_id, "Settled payment references a missing course");
            }
        }
    }

    tx.save_settlement(&payment).await?;
    debug!(tx_ref = %tx_ref, ?fan_out, "Fan-out staged");
    Ok(fan_out)
}
