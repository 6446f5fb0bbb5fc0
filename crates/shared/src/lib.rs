#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Fanvault shared primitives
//!
//! Money and billing-period arithmetic used by every other crate, plus the
//! database pool and migration helpers.

pub mod db;
pub mod money;
pub mod period;

pub use db::{create_pool, run_migrations};
pub use money::{mul_div_round_half_up, Currency, Money, MoneyError};
pub use period::{ceil_days_between, BillingPeriod, DEFAULT_PERIOD_DAYS};
