//! Application state

use std::sync::Arc;

use fanvault_billing::BillingService;
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    /// Absent when running over the in-memory store
    pub pool: Option<PgPool>,
}

impl AppState {
    /// Production state over Postgres and the configured gateway
    pub fn from_pool(pool: PgPool, config: &Config) -> anyhow::Result<Self> {
        let billing = BillingService::from_env(pool.clone())?;
        tracing::info!(
            bind_address = %config.bind_address,
            period_days = billing.config.period.days(),
            currency = %billing.config.currency.code(),
            "Billing service initialized"
        );
        Ok(Self {
            billing: Arc::new(billing),
            pool: Some(pool),
        })
    }

    pub fn new(billing: Arc<BillingService>) -> Self {
        Self {
            billing,
            pool: None,
        }
    }
}
