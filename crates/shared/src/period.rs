//! Billing period and calendar-day counting

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Default billing period length in days
pub const DEFAULT_PERIOD_DAYS: u32 = 30;

/// Fixed-length billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    days: u32,
}

impl Default for BillingPeriod {
    fn default() -> Self {
        Self {
            days: DEFAULT_PERIOD_DAYS,
        }
    }
}

impl BillingPeriod {
    /// Returns `None` for a zero-length period
    pub fn new(days: u32) -> Option<Self> {
        (days > 0).then_some(Self { days })
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.days))
    }

    /// The date one period after `from`
    pub fn advance(&self, from: OffsetDateTime) -> OffsetDateTime {
        from + self.duration()
    }

    /// Whole days left until `next_billing_date`, rounded up and clamped to
    /// `[0, days]`. A change requested at or after the billing instant has
    /// zero days remaining.
    pub fn days_remaining(&self, next_billing_date: OffsetDateTime, now: OffsetDateTime) -> u32 {
        ceil_days_between(now, next_billing_date).min(self.days)
    }
}

/// `ceil((to - from) in days)`, or 0 when `to <= from`
pub fn ceil_days_between(from: OffsetDateTime, to: OffsetDateTime) -> u32 {
    if to <= from {
        return 0;
    }
    let span = to - from;
    let whole = span.whole_days();
    let partial = span - Duration::days(whole) > Duration::ZERO;
    let days = whole + i64::from(partial);
    u32::try_from(days).unwrap_or(u32::MAX)
}
