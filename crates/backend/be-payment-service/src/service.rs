use std::sync::Arc;

use be_auth_core::JwtConfig;
use be_remote_db::SettlementStore;

use crate::config::PaymentConfig;
use crate::error::PaymentError;
use crate::gateway::{ChapaClient, PaymentGateway};
use crate::payout::PayoutLedger;
use crate::settlement::SettlementService;

pub struct AppState {
    pub settlement: SettlementService,
    pub payouts: PayoutLedger,
    pub config: PaymentConfig,
    pub jwt_config: Arc<JwtConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: PaymentConfig,
        jwt_config: Arc<JwtConfig>,
    ) -> Self {
        Self {
            settlement: SettlementService::new(Arc::clone(&store), gateway),
            payouts: PayoutLedger::new(store),
            config,
            jwt_config,
        }
    }

    /// Wires the Chapa client from `CHAPA_*` variables.
    ///
    /// A missing secret key is not fatal here; gateway calls fail with a
    /// configuration error until it is set.
    pub fn from_env(
        store: Arc<dyn SettlementStore>,
        jwt_config: Arc<JwtConfig>,
    ) -> Result<Self, PaymentError> {
        let config = PaymentConfig::from_env()?;
        let gateway = ChapaClient::from_config(&config)?;
        Ok(Self::new(store, Arc::new(gateway), config, jwt_config))
    }
}
