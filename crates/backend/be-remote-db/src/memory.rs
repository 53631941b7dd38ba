use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::store::{SettlementStore, SettlementTx};
use crate::types::{
    Course, Enrollment, NewPayment, Payment, PaymentChanges, PaymentStatus, PayoutStatus, User,
};

#[derive(Debug, Default, Clone)]
struct State {
    users: HashMap<Uuid, User>,
    courses: HashMap<Uuid, Course>,
    course_students: HashMap<Uuid, BTreeSet<Uuid>>,
    enrollments: Vec<Enrollment>,
    payments: HashMap<Uuid, Payment>,
}

impl State {
    fn payment_by_tx_ref(&self, tx_ref: &str) -> Option<&Payment> {
        self.payments.values().find(|p| p.tx_ref == tx_ref)
    }

    fn payment_by_tx_ref_mut(&mut self, tx_ref: &str) -> Option<&mut Payment> {
        self.payments.values_mut().find(|p| p.tx_ref == tx_ref)
    }

    fn enrollment(&self, student_id: Uuid, course_id: Uuid) -> Option<&Enrollment> {
        self.enrollments
            .iter()
            .find(|e| e.student_id == student_id && e.course_id == course_id)
    }
}

/// In-process store for local mode and tests.
///
/// A single async mutex guards all state. A unit of work holds that mutex
/// for its whole lifetime and applies a staged copy on commit, so units are
/// serialized and an abandoned unit leaves no trace.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_course(&self, course: Course) {
        self.state.lock().await.courses.insert(course.id, course);
    }

    pub async fn enrollments(&self) -> Vec<Enrollment> {
        self.state.lock().await.enrollments.clone()
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn course(&self, id: Uuid) -> DbResult<Option<Course>> {
        Ok(self.state.lock().await.courses.get(&id).cloned())
    }

    async fn course_students(&self, course_id: Uuid) -> DbResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .course_students
            .get(&course_id)
            .map(|students| students.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn user(&self, id: Uuid) -> DbResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn insert_payment(&self, payment: NewPayment) -> DbResult<Payment> {
        let mut state = self.state.lock().await;
        if state.payment_by_tx_ref(&payment.tx_ref).is_some() {
            return Err(DbError::duplicate("tx_ref", payment.tx_ref));
        }
        let payment = payment.into_payment(Utc::now());
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn payment(&self, id: Uuid) -> DbResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn payment_by_tx_ref(&self, tx_ref: &str) -> DbResult<Option<Payment>> {
        Ok(self.state.lock().await.payment_by_tx_ref(tx_ref).cloned())
    }

    async fn payments_for_user(&self, user_id: Uuid) -> DbResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn all_payments(&self) -> DbResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state.payments.values().cloned().collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn update_payment(
        &self,
        id: Uuid,
        changes: &PaymentChanges,
    ) -> DbResult<Option<Payment>> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| DbError::not_found_with_id("payment", id.to_string()))?;
        if payment.status == PaymentStatus::Success {
            return Ok(None);
        }
        changes.apply(payment);
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn delete_payment(&self, id: Uuid) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let status = state
            .payments
            .get(&id)
            .map(|p| p.status)
            .ok_or_else(|| DbError::not_found_with_id("payment", id.to_string()))?;
        if status == PaymentStatus::Success {
            return Ok(false);
        }
        state.payments.remove(&id);
        Ok(true)
    }

    async fn record_verification_outcome(
        &self,
        tx_ref: &str,
        status: PaymentStatus,
    ) -> DbResult<Payment> {
        let mut state = self.state.lock().await;
        let payment = state
            .payment_by_tx_ref_mut(tx_ref)
            .ok_or_else(|| DbError::not_found_with_id("payment", tx_ref))?;
        if payment.status != PaymentStatus::Success {
            payment.status = status;
            payment.updated_at = Utc::now();
        }
        Ok(payment.clone())
    }

    async fn unpaid_payouts(&self) -> DbResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.payout_credited && p.payout_status != PayoutStatus::Paid)
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    async fn mark_payout_paid(
        &self,
        id: Uuid,
        payout_tx_ref: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> DbResult<Option<Payment>> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| DbError::not_found_with_id("payment", id.to_string()))?;

        if !payment.payout_credited || payment.payout_status == PayoutStatus::Paid {
            return Ok(None);
        }

        payment.payout_status = PayoutStatus::Paid;
        payment.payout_paid_at = Some(paid_at);
        if payout_tx_ref.is_some() {
            payment.payout_tx_ref = payout_tx_ref;
        }
        payment.updated_at = paid_at;
        Ok(Some(payment.clone()))
    }

    async fn begin(&self) -> DbResult<Box<dyn SettlementTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl SettlementTx for MemoryTx {
    async fn payment_for_update(&mut self, tx_ref: &str) -> DbResult<Option<Payment>> {
        Ok(self.staged.payment_by_tx_ref(tx_ref).cloned())
    }

    async fn course(&mut self, id: Uuid) -> DbResult<Option<Course>> {
        Ok(self.staged.courses.get(&id).cloned())
    }

    async fn enrollment(
        &mut self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DbResult<Option<Enrollment>> {
        Ok(self.staged.enrollment(student_id, course_id).cloned())
    }

    async fn create_enrollment(
        &mut self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DbResult<Enrollment> {
        if self.staged.enrollment(student_id, course_id).is_some() {
            return Err(DbError::duplicate(
                "enrollment",
                format!("{student_id}/{course_id}"),
            ));
        }
        let enrollment = Enrollment::new(student_id, course_id, Utc::now());
        self.staged.enrollments.push(enrollment.clone());
        Ok(enrollment)
    }

    async fn add_course_student(&mut self, course_id: Uuid, student_id: Uuid) -> DbResult<()> {
        if !self.staged.courses.contains_key(&course_id) {
            return Err(DbError::not_found_with_id("course", course_id.to_string()));
        }
        self.staged
            .course_students
            .entry(course_id)
            .or_default()
            .insert(student_id);
        Ok(())
    }

    async fn credit_instructor(&mut self, user_id: Uuid, amount: Decimal) -> DbResult<bool> {
        let Some(user) = self.staged.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.earnings += amount;
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn save_settlement(&mut self, payment: &Payment) -> DbResult<()> {
        let stored = self
            .staged
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| DbError::not_found_with_id("payment", payment.id.to_string()))?;
        stored.status = payment.status;
        stored.platform_share = payment.platform_share;
        stored.instructor_share = payment.instructor_share;
        stored.gateway_fee_estimate = payment.gateway_fee_estimate;
        stored.payout_credited = payment.payout_credited;
        stored.payout_status = payment.payout_status;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}
