use bon::Builder;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Success => write!(f, "success"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_kind")]
pub enum PaymentKind {
    #[sqlx(rename = "subscription")]
    #[serde(rename = "subscription")]
    Subscription,
    #[sqlx(rename = "one-time")]
    #[serde(rename = "one-time")]
    OneTime,
}

impl std::fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentKind::Subscription => write!(f, "subscription"),
            PaymentKind::OneTime => write!(f, "one-time"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    #[default]
    Pending,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Option<Uuid>,
    pub tx_ref: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub platform_share: Decimal,
    pub instructor_share: Decimal,
    pub gateway_fee_estimate: Decimal,
    pub payout_credited: bool,
    pub payout_status: PayoutStatus,
    pub payout_paid_at: Option<DateTime<Utc>>,
    pub payout_tx_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a payment row. Split and payout fields start zeroed.
#[derive(Debug, Clone, Builder)]
pub struct NewPayment {
    pub user_id: Uuid,
    pub course_id: Option<Uuid>,
    #[builder(into)]
    pub tx_ref: String,
    pub amount: Decimal,
    pub kind: PaymentKind,
    #[builder(default)]
    pub status: PaymentStatus,
}

impl NewPayment {
    pub fn into_payment(self, now: DateTime<Utc>) -> Payment {
        Payment {
            id: Uuid::now_v7(),
            user_id: self.user_id,
            course_id: self.course_id,
            tx_ref: self.tx_ref,
            amount: self.amount,
            kind: self.kind,
            status: self.status,
            platform_share: Decimal::ZERO,
            instructor_share: Decimal::ZERO,
            gateway_fee_estimate: Decimal::ZERO,
            payout_credited: false,
            payout_status: PayoutStatus::Pending,
            payout_paid_at: None,
            payout_tx_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Payer-editable fields of a payment. `None` leaves a field unchanged.
///
/// Status, split and payout fields are only ever written by settlement and
/// the payout ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentChanges {
    pub course_id: Option<Uuid>,
    pub amount: Option<Decimal>,
    pub kind: Option<PaymentKind>,
}

impl PaymentChanges {
    pub fn is_empty(&self) -> bool {
        self.course_id.is_none() && self.amount.is_none() && self.kind.is_none()
    }

    pub(crate) fn apply(&self, payment: &mut Payment) {
        if let Some(course_id) = self.course_id {
            payment.course_id = Some(course_id);
        }
        if let Some(amount) = self.amount {
            payment.amount = amount;
        }
        if let Some(kind) = self.kind {
            payment.kind = kind;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub progress: i32,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(student_id: Uuid, course_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            student_id,
            course_id,
            progress: 0,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub instructor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub earnings: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_payment_defaults_to_pending() {
        let payment = NewPayment::builder()
            .user_id(Uuid::nil())
            .tx_ref("tx_1")
            .amount(dec!(1000))
            .kind(PaymentKind::OneTime)
            .build()
            .into_payment(Utc::now());

        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.payout_status, PayoutStatus::Pending);
        assert!(!payment.payout_credited);
        assert_eq!(payment.platform_share, Decimal::ZERO);
        assert!(payment.course_id.is_none());
    }

    #[test]
    fn payment_kind_uses_hyphenated_wire_name() {
        assert_eq!(
            serde_json::to_string(&PaymentKind::OneTime).unwrap(),
            "\"one-time\""
        );
        let kind: PaymentKind = serde_json::from_str("\"subscription\"").unwrap();
        assert_eq!(kind, PaymentKind::Subscription);
    }

    #[test]
    fn payment_serializes_kind_as_type() {
        let payment = NewPayment::builder()
            .user_id(Uuid::nil())
            .tx_ref("tx_2")
            .amount(dec!(50))
            .kind(PaymentKind::Subscription)
            .build()
            .into_payment(Utc::now());

        let json = serde_json::to_value(&payment).unwrap();
        assert_eq!(json["type"], "subscription");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["payout_status"], "pending");
    }
}
