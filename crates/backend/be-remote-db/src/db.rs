use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    Postgres, Transaction,
    migrate::MigrateDatabase,
    postgres::{PgPool, PgPoolOptions},
};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    error::{DbError, DbResult},
    store::{SettlementStore, SettlementTx},
    types::{Course, Enrollment, NewPayment, Payment, PaymentChanges, PaymentStatus, User},
};

const PAYMENT_COLUMNS: &str = r#"
    id, user_id, course_id, tx_ref, amount, kind, status,
    platform_share, instructor_share, gateway_fee_estimate,
    payout_credited, payout_status, payout_paid_at, payout_tx_ref,
    created_at, updated_at
"#;

#[derive(Debug)]
pub struct DatabaseManager {
    pub pool: PgPool,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> DbResult<Self> {
        if !sqlx::Postgres::database_exists(database_url).await? {
            sqlx::Postgres::create_database(database_url).await?;
        }

        let pool = PgPoolOptions::new()
            .max_connections(50)
            .min_connections(3)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        let db_manager = DatabaseManager { pool };

        Self::run_migrations(&db_manager.pool).await?;

        Ok(db_manager)
    }

    async fn run_migrations(pool: &PgPool) -> DbResult<()> {
        let migrator = sqlx::migrate!("./src/migrations");
        migrator.run(pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for DatabaseManager {
    async fn course(&self, id: Uuid) -> DbResult<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(
            r#"
            SELECT id, title, instructor_id, created_at, updated_at
            FROM courses
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(course)
    }

    async fn course_students(&self, course_id: Uuid) -> DbResult<Vec<Uuid>> {
        let students: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT student_id FROM course_students
            WHERE course_id = $1
            ORDER BY student_id
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(students)
    }

    async fn user(&self, id: Uuid) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, role, earnings, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn insert_payment(&self, payment: NewPayment) -> DbResult<Payment> {
        let row = payment.into_payment(Utc::now());

        let query = format!(
            r#"
            INSERT INTO payments (id, user_id, course_id, tx_ref, amount, kind, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {PAYMENT_COLUMNS}
            "#
        );

        let inserted = sqlx::query_as::<_, Payment>(&query)
            .bind(row.id)
            .bind(row.user_id)
            .bind(row.course_id)
            .bind(&row.tx_ref)
            .bind(row.amount)
            .bind(row.kind)
            .bind(row.status)
            .bind(row.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let err = DbError::from(e);
                if err.is_duplicate() {
                    DbError::duplicate("tx_ref", row.tx_ref.clone())
                } else {
                    err
                }
            })?;

        Ok(inserted)
    }

    async fn payment(&self, id: Uuid) -> DbResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let payment = sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    async fn payment_by_tx_ref(&self, tx_ref: &str) -> DbResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE tx_ref = $1");
        let payment = sqlx::query_as::<_, Payment>(&query)
            .bind(tx_ref)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    async fn payments_for_user(&self, user_id: Uuid) -> DbResult<Vec<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let payments = sqlx::query_as::<_, Payment>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    async fn all_payments(&self) -> DbResult<Vec<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY created_at DESC");
        let payments = sqlx::query_as::<_, Payment>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    async fn update_payment(
        &self,
        id: Uuid,
        changes: &PaymentChanges,
    ) -> DbResult<Option<Payment>> {
        let query = format!(
            r#"
            UPDATE payments
            SET course_id = COALESCE($2, course_id),
                amount = COALESCE($3, amount),
                kind = COALESCE($4, kind),
                updated_at = $5
            WHERE id = $1 AND status <> 'success'
            RETURNING {PAYMENT_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .bind(changes.course_id)
            .bind(changes.amount)
            .bind(changes.kind)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        if updated.is_none() && self.payment(id).await?.is_none() {
            return Err(DbError::not_found_with_id("payment", id.to_string()));
        }

        Ok(updated)
    }

    async fn delete_payment(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM payments WHERE id = $1 AND status <> 'success'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.payment(id).await?.is_none() {
            return Err(DbError::not_found_with_id("payment", id.to_string()));
        }

        Ok(false)
    }

    async fn record_verification_outcome(
        &self,
        tx_ref: &str,
        status: PaymentStatus,
    ) -> DbResult<Payment> {
        let query = format!(
            r#"
            UPDATE payments
            SET status = $2, updated_at = $3
            WHERE tx_ref = $1 AND status <> 'success'
            RETURNING {PAYMENT_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, Payment>(&query)
            .bind(tx_ref)
            .bind(status)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(payment) => Ok(payment),
            None => self
                .payment_by_tx_ref(tx_ref)
                .await?
                .ok_or_else(|| DbError::not_found_with_id("payment", tx_ref)),
        }
    }

    async fn unpaid_payouts(&self) -> DbResult<Vec<Payment>> {
        let query = format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE payout_credited AND payout_status <> 'paid'
            ORDER BY created_at ASC
            "#
        );
        let payments = sqlx::query_as::<_, Payment>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    async fn mark_payout_paid(
        &self,
        id: Uuid,
        payout_tx_ref: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> DbResult<Option<Payment>> {
        let query = format!(
            r#"
            UPDATE payments
            SET payout_status = 'paid',
                payout_paid_at = $2,
                payout_tx_ref = COALESCE($3, payout_tx_ref),
                updated_at = $2
            WHERE id = $1 AND payout_credited AND payout_status <> 'paid'
            RETURNING {PAYMENT_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .bind(paid_at)
            .bind(payout_tx_ref)
            .fetch_optional(&self.pool)
            .await?;

        if updated.is_none() && self.payment(id).await?.is_none() {
            return Err(DbError::not_found_with_id("payment", id.to_string()));
        }

        Ok(updated)
    }

    async fn begin(&self) -> DbResult<Box<dyn SettlementTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSettlementTx { tx }))
    }
}

struct PgSettlementTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SettlementTx for PgSettlementTx {
    async fn payment_for_update(&mut self, tx_ref: &str) -> DbResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE tx_ref = $1 FOR UPDATE");
        let payment = sqlx::query_as::<_, Payment>(&query)
            .bind(tx_ref)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(payment)
    }

    async fn course(&mut self, id: Uuid) -> DbResult<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(
            r#"
            SELECT id, title, instructor_id, created_at, updated_at
            FROM courses
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(course)
    }

    async fn enrollment(
        &mut self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DbResult<Option<Enrollment>> {
        let enrollment = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT id, student_id, course_id, progress, completed, created_at, updated_at
            FROM enrollments
            WHERE student_id = $1 AND course_id = $2
            "#,
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(enrollment)
    }

    async fn create_enrollment(
        &mut self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> DbResult<Enrollment> {
        let row = Enrollment::new(student_id, course_id, Utc::now());

        let enrollment = sqlx::query_as::<_, Enrollment>(
            r#"
            INSERT INTO enrollments (id, student_id, course_id, progress, completed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING id, student_id, course_id, progress, completed, created_at, updated_at
            "#,
        )
        .bind(row.id)
        .bind(row.student_id)
        .bind(row.course_id)
        .bind(row.progress)
        .bind(row.completed)
        .bind(row.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(enrollment)
    }

    async fn add_course_student(&mut self, course_id: Uuid, student_id: Uuid) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO course_students (course_id, student_id)
            VALUES ($1, $2)
            ON CONFLICT (course_id, student_id) DO NOTHING
            "#,
        )
        .bind(course_id)
        .bind(student_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn credit_instructor(&mut self, user_id: Uuid, amount: Decimal) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET earnings = earnings + $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_settlement(&mut self, payment: &Payment) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2,
                platform_share = $3,
                instructor_share = $4,
                gateway_fee_estimate = $5,
                payout_credited = $6,
                payout_status = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(payment.status)
        .bind(payment.platform_share)
        .bind(payment.instructor_share)
        .bind(payment.gateway_fee_estimate)
        .bind(payment.payout_credited)
        .bind(payment.payout_status)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found_with_id("payment", payment.id.to_string()));
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let this = *self;
        this.tx
            .commit()
            .await
            .map_err(|e| DbError::transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        let this = *self;
        this.tx
            .rollback()
            .await
            .map_err(|e| DbError::transaction(e.to_string()))
    }
}
