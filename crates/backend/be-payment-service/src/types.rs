use be_remote_db::{Payment, PaymentChanges, PaymentKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub course: Option<Uuid>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: PaymentKind,
    #[serde(default, rename = "callbackUrl", alias = "callback_url")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment: Payment,
    pub checkout_url: String,
    pub chapa_data: serde_json::Value,
    pub chapa_public_key: Option<String>,
}

/// Manual record of a payment with a reference issued elsewhere.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub course: Option<Uuid>,
    pub tx_ref: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: PaymentKind,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    pub tx_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub chapa: serde_json::Value,
    pub payment: Payment,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkPaidRequest {
    #[serde(default, rename = "payoutTxRef", alias = "payout_tx_ref")]
    pub payout_tx_ref: Option<String>,
}

/// Payer-editable fields; omitted fields are left unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    #[serde(default)]
    pub course: Option<Uuid>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default, rename = "type")]
    pub kind: Option<PaymentKind>,
}

impl From<UpdatePaymentRequest> for PaymentChanges {
    fn from(body: UpdatePaymentRequest) -> Self {
        PaymentChanges {
            course_id: body.course,
            amount: body.amount,
            kind: body.kind,
        }
    }
}
