//! Billing configuration

use fanvault_shared::{BillingPeriod, Currency, DEFAULT_PERIOD_DAYS};

use crate::error::{BillingError, BillingResult};

/// Settings shared by every billing service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingConfig {
    pub period: BillingPeriod,
    /// Currency new tiers are priced in when the caller does not say
    pub currency: Currency,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            period: BillingPeriod::default(),
            currency: Currency::default(),
        }
    }
}

impl BillingConfig {
    /// Read `BILLING_PERIOD_DAYS` and `DEFAULT_CURRENCY`
    pub fn from_env() -> BillingResult<Self> {
        let days = match std::env::var("BILLING_PERIOD_DAYS") {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
                BillingError::Config(format!("BILLING_PERIOD_DAYS is not a number: {}", raw))
            })?,
            Err(_) => DEFAULT_PERIOD_DAYS,
        };
        let period = BillingPeriod::new(days)
            .ok_or_else(|| BillingError::Config("BILLING_PERIOD_DAYS must be positive".into()))?;

        let currency = match std::env::var("DEFAULT_CURRENCY") {
            Ok(code) => Currency::new(&code)
                .map_err(|e| BillingError::Config(format!("DEFAULT_CURRENCY: {}", e)))?,
            Err(_) => Currency::default(),
        };

        Ok(Self { period, currency })
    }
}
