//! Storage contracts consumed by the settlement and payout flows.
//!
//! [`SettlementStore`] covers single-statement reads and writes.
//! [`SettlementTx`] is one unit of work: every write issued through it
//! becomes visible on [`SettlementTx::commit`] or not at all. Dropping an
//! uncommitted unit discards its writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::DbResult;
use crate::types::{Course, Enrollment, NewPayment, Payment, PaymentChanges, PaymentStatus, User};

#[async_trait]
pub trait SettlementStore: Send + Sync + 'static {
    async fn course(&self, id: Uuid) -> DbResult<Option<Course>>;

    async fn course_students(&self, course_id: Uuid) -> DbResult<Vec<Uuid>>;

    async fn user(&self, id: Uuid) -> DbResult<Option<User>>;

    /// Fails with `DbError::Duplicate` when `tx_ref` is already taken.
    async fn insert_payment(&self, payment: NewPayment) -> DbResult<Payment>;

    async fn payment(&self, id: Uuid) -> DbResult<Option<Payment>>;

    async fn payment_by_tx_ref(&self, tx_ref: &str) -> DbResult<Option<Payment>>;

    async fn payments_for_user(&self, user_id: Uuid) -> DbResult<Vec<Payment>>;

    /// Every payment, newest first.
    async fn all_payments(&self) -> DbResult<Vec<Payment>>;

    /// Applies payer-editable changes to a payment that has not settled.
    /// Returns `None` for a settled payment and fails with
    /// `DbError::NotFound` when the payment does not exist.
    async fn update_payment(
        &self,
        id: Uuid,
        changes: &PaymentChanges,
    ) -> DbResult<Option<Payment>>;

    /// Removes a payment that has not settled. Returns `false` for a settled
    /// payment and fails with `DbError::NotFound` when it does not exist.
    async fn delete_payment(&self, id: Uuid) -> DbResult<bool>;

    /// Writes a non-success verification result. A row already in
    /// `success` is returned untouched.
    async fn record_verification_outcome(
        &self,
        tx_ref: &str,
        status: PaymentStatus,
    ) -> DbResult<Payment>;

    /// Payments credited to an instructor ledger but not yet paid out.
    async fn unpaid_payouts(&self) -> DbResult<Vec<Payment>>;

    /// Flips `payout_status` to `paid` if the payment is credited and not
    /// already paid. Returns `None` when that precondition does not hold and
    /// fails with `DbError::NotFound` when the payment does not exist.
    async fn mark_payout_paid(
        &self,
        id: Uuid,
        payout_tx_ref: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> DbResult<Option<Payment>>;

    async fn begin(&self) -> DbResult<Box<dyn SettlementTx>>;
}

#[async_trait]
pub trait SettlementTx: Send {
    /// Reads the payment row and holds it exclusively until the unit ends.
    async fn payment_for_update(&mut self, tx_ref: &str) -> DbResult<Option<Payment>>;

    async fn course(&mut self, id: Uuid) -> DbResult<Option<Course>>;

    async fn enrollment(&mut self, student_id: Uuid, course_id: Uuid)
    -> DbResult<Option<Enrollment>>;

    async fn create_enrollment(&mut self, student_id: Uuid, course_id: Uuid)
    -> DbResult<Enrollment>;

    /// Set-add: a student already on the course is left as is.
    async fn add_course_student(&mut self, course_id: Uuid, student_id: Uuid) -> DbResult<()>;

    /// Atomic increment of the user's ledger balance. Returns `false` when
    /// no such user exists.
    async fn credit_instructor(&mut self, user_id: Uuid, amount: Decimal) -> DbResult<bool>;

    /// Persists status, split fields and payout flags of `payment`.
    async fn save_settlement(&mut self, payment: &Payment) -> DbResult<()>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}
