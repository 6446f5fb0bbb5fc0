//! Proration for mid-cycle tier changes
//!
//! Daily rates are `monthly_price / period_days`. The prorated amount is the
//! difference of daily rates times the whole days left until the next billing
//! date, computed exactly in minor units and rounded half-up.

use fanvault_shared::{BillingPeriod, Money};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::models::{ChangeType, SubscriptionTier};

/// Result of prorating a tier change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proration {
    pub is_upgrade: bool,
    /// Charge for an upgrade, credit for a downgrade; never negative
    pub amount: Money,
    pub days_remaining: u32,
}

impl Proration {
    pub fn change_type(&self) -> ChangeType {
        if self.is_upgrade {
            ChangeType::Upgrade
        } else {
            ChangeType::Downgrade
        }
    }

    /// The change is a plain tier switch with nothing to charge or credit
    pub fn is_immediate_switch(&self) -> bool {
        self.days_remaining == 0
    }
}

/// Prorate a change from `current` to `target`.
///
/// Rank alone decides upgrade versus downgrade. An upgrade whose price
/// difference is not positive costs nothing; a downgrade credit is clamped at
/// zero. Requesting the current tier is a validation error.
pub fn prorate(
    current: &SubscriptionTier,
    target: &SubscriptionTier,
    next_billing_date: OffsetDateTime,
    now: OffsetDateTime,
    period: BillingPeriod,
) -> BillingResult<Proration> {
    if current.id == target.id {
        return Err(BillingError::Validation(format!(
            "Already subscribed to tier '{}'",
            current.name
        )));
    }
    if current.creator_id != target.creator_id {
        return Err(BillingError::Validation(
            "Tiers belong to different creators".to_string(),
        ));
    }
    if current.rank == target.rank {
        return Err(BillingError::Validation(format!(
            "Tiers '{}' and '{}' share rank {}",
            current.name, target.name, current.rank
        )));
    }
    current.monthly_price.ensure_same_currency(&target.monthly_price)?;

    let is_upgrade = target.rank > current.rank;
    let days_remaining = period.days_remaining(next_billing_date, now);

    let delta = if is_upgrade {
        target.monthly_price.checked_sub(&current.monthly_price)?
    } else {
        current.monthly_price.checked_sub(&target.monthly_price)?
    };

    let amount = delta
        .scale(i64::from(days_remaining), i64::from(period.days()))?
        .non_negative();

    Ok(Proration {
        is_upgrade,
        amount,
        days_remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanvault_shared::Currency;
    use time::macros::datetime;
    use time::Duration;
    use uuid::Uuid;

    fn tier(creator_id: Uuid, rank: i32, price_minor: i64) -> SubscriptionTier {
        SubscriptionTier {
            id: Uuid::new_v4(),
            creator_id,
            name: format!("rank-{}", rank),
            monthly_price: Money::new(price_minor, Currency::new("GHS").unwrap()),
            rank,
            active: true,
        }
    }

    #[test]
    fn test_upgrade_ten_of_thirty_days() {
        let creator = Uuid::new_v4();
        let basic = tier(creator, 1, 2000);
        let plus = tier(creator, 2, 5000);
        let now = datetime!(2025-06-01 00:00 UTC);
        let next = now + Duration::days(10);

        let p = prorate(&basic, &plus, next, now, BillingPeriod::default()).unwrap();
        assert!(p.is_upgrade);
        assert_eq!(p.days_remaining, 10);
        assert_eq!(p.amount.minor, 1000);
        assert_eq!(p.amount.to_string(), "GHS 10.00");
    }

    #[test]
    fn test_downgrade_is_credit() {
        let creator = Uuid::new_v4();
        let basic = tier(creator, 1, 2000);
        let plus = tier(creator, 2, 5000);
        let now = datetime!(2025-06-01 00:00 UTC);
        let next = now + Duration::days(7);

        let p = prorate(&plus, &basic, next, now, BillingPeriod::default()).unwrap();
        assert!(!p.is_upgrade);
        assert_eq!(p.change_type(), ChangeType::Downgrade);
        assert_eq!(p.amount.minor, 700);
    }

    #[test]
    fn test_rounds_half_up() {
        let creator = Uuid::new_v4();
        let low = tier(creator, 1, 1000);
        let high = tier(creator, 2, 1001);
        let now = datetime!(2025-06-01 00:00 UTC);
        let next = now + Duration::days(15);

        // 1 * 15 / 30 = 0.5 minor units, rounds up
        let p = prorate(&low, &high, next, now, BillingPeriod::default()).unwrap();
        assert_eq!(p.amount.minor, 1);
    }

    #[test]
    fn test_upgrade_with_price_drop_is_free() {
        let creator = Uuid::new_v4();
        let low = tier(creator, 1, 5000);
        let high = tier(creator, 2, 3000);
        let now = datetime!(2025-06-01 00:00 UTC);

        let p = prorate(&low, &high, now + Duration::days(12), now, BillingPeriod::default())
            .unwrap();
        assert!(p.is_upgrade);
        assert!(p.amount.is_zero());
    }

    #[test]
    fn test_change_on_billing_date() {
        let creator = Uuid::new_v4();
        let low = tier(creator, 1, 2000);
        let high = tier(creator, 2, 5000);
        let now = datetime!(2025-06-01 00:00 UTC);

        let p = prorate(&low, &high, now, now, BillingPeriod::default()).unwrap();
        assert_eq!(p.days_remaining, 0);
        assert!(p.amount.is_zero());
        assert!(p.is_immediate_switch());
    }

    #[test]
    fn test_same_tier_rejected() {
        let creator = Uuid::new_v4();
        let low = tier(creator, 1, 2000);
        let now = datetime!(2025-06-01 00:00 UTC);

        let err = prorate(&low, &low, now, now, BillingPeriod::default()).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn test_cross_creator_and_currency_rejected() {
        let low = tier(Uuid::new_v4(), 1, 2000);
        let other_creator = tier(Uuid::new_v4(), 2, 5000);
        let now = datetime!(2025-06-01 00:00 UTC);
        assert!(matches!(
            prorate(&low, &other_creator, now, now, BillingPeriod::default()),
            Err(BillingError::Validation(_))
        ));

        let mut usd = tier(low.creator_id, 2, 5000);
        usd.monthly_price = Money::new(5000, Currency::new("USD").unwrap());
        assert!(matches!(
            prorate(&low, &usd, now, now, BillingPeriod::default()),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_amount_never_negative_over_price_grid() {
        let creator = Uuid::new_v4();
        let now = datetime!(2025-06-01 00:00 UTC);
        let prices = [1, 999, 2000, 5000, 123_456];
        for &a in &prices {
            for &b in &prices {
                for days in [0, 1, 13, 30, 31] {
                    let low = tier(creator, 1, a);
                    let high = tier(creator, 2, b);
                    let next = now + Duration::days(days);
                    let up = prorate(&low, &high, next, now, BillingPeriod::default()).unwrap();
                    let down = prorate(&high, &low, next, now, BillingPeriod::default()).unwrap();
                    assert!(up.amount.minor >= 0);
                    assert!(down.amount.minor >= 0);
                    assert!(up.days_remaining <= 30);
                }
            }
        }
    }
}
