use std::sync::Arc;

use be_remote_db::{Payment, SettlementStore};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::analytics;
use crate::error::PaymentError;

/// Admin view of instructor payouts credited by settlement.
pub struct PayoutLedger {
    store: Arc<dyn SettlementStore>,
}

impl PayoutLedger {
    pub fn new(store: Arc<dyn SettlementStore>) -> Self {
        Self { store }
    }

    pub async fn unpaid_payouts(&self) -> Result<Vec<Payment>, PaymentError> {
        Ok(self.store.unpaid_payouts().await?)
    }

    /// Records that the instructor share of payment `id` has been paid out.
    pub async fn mark_paid(
        &self,
        id: Uuid,
        payout_tx_ref: Option<String>,
    ) -> Result<Payment, PaymentError> {
        let payout_tx_ref = payout_tx_ref.filter(|r| !r.trim().is_empty());
        let has_ref = payout_tx_ref.is_some();

        let Some(payment) = self
            .store
            .mark_payout_paid(id, payout_tx_ref, Utc::now())
            .await?
        else {
            return Err(PaymentError::Conflict(
                "Payout is not credited or already paid".into(),
            ));
        };

        info!(payment_id = %payment.id, "Payout marked as paid");
        analytics::track_payout_marked_paid(has_ref);
        Ok(payment)
    }
}
