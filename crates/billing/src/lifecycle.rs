//! Subscription state machine
//!
//! Pure transitions over a [`Subscription`] value. Callers persist the result
//! with a compare-and-set on `version`; nothing here touches the store.
//!
//! ```text
//! active ──pause──▶ paused ──resume──▶ active
//!   │                 │
//!   └────cancel───────┴──▶ cancelled ──(period end)──▶ expired
//! ```

use fanvault_shared::{BillingPeriod, Money};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{ChangeType, PendingChange, Subscription, SubscriptionStatus};

/// A requested change to a subscription record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Pause,
    Resume,
    Cancel,
    /// Scheduler-driven move of a lapsed paused/cancelled subscription
    Expire,
    /// Defer a downgrade to the next billing date, replacing any pending change
    ScheduleDowngrade { target_tier_id: Uuid, credit: Money },
    ClearPendingChange,
    /// Immediate tier switch (settled upgrade, or a change on the billing date)
    SwitchTier { tier_id: Uuid },
    /// Apply a due pending change and roll the billing date forward
    ExecutePendingChange { period: BillingPeriod },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Cancel => "cancel",
            Transition::Expire => "expire",
            Transition::ScheduleDowngrade { .. } => "schedule_downgrade",
            Transition::ClearPendingChange => "clear_pending_change",
            Transition::SwitchTier { .. } => "switch_tier",
            Transition::ExecutePendingChange { .. } => "execute_pending_change",
        }
    }
}

fn invalid(sub: &Subscription, transition: &Transition) -> BillingError {
    BillingError::State(format!(
        "Cannot {} a subscription that is {}",
        transition.name().replace('_', " "),
        sub.status
    ))
}

/// Apply `transition` to `sub`, returning the next record with `version + 1`
pub fn apply(
    sub: &Subscription,
    transition: &Transition,
    now: OffsetDateTime,
) -> BillingResult<Subscription> {
    let mut next = sub.clone();
    next.version = sub.version + 1;

    match (sub.status, transition) {
        // A paused subscription cannot carry a pending change
        (SubscriptionStatus::Active, Transition::Pause) => {
            next.status = SubscriptionStatus::Paused;
            next.auto_renew = false;
            next.pending_change = None;
        }

        (SubscriptionStatus::Paused, Transition::Resume) => {
            if sub.next_billing_date <= now {
                return Err(BillingError::State(
                    "Paid period has ended; subscribe again instead of resuming".to_string(),
                ));
            }
            next.status = SubscriptionStatus::Active;
            next.auto_renew = true;
        }

        (SubscriptionStatus::Active | SubscriptionStatus::Paused, Transition::Cancel) => {
            next.status = SubscriptionStatus::Cancelled;
            next.auto_renew = false;
            next.pending_change = None;
        }

        (SubscriptionStatus::Paused | SubscriptionStatus::Cancelled, Transition::Expire) => {
            if sub.next_billing_date > now {
                return Err(BillingError::State(format!(
                    "Subscription {} is still inside its paid period",
                    sub.id
                )));
            }
            next.status = SubscriptionStatus::Expired;
            next.auto_renew = false;
        }

        (
            SubscriptionStatus::Active,
            Transition::ScheduleDowngrade {
                target_tier_id,
                credit,
            },
        ) => {
            if *target_tier_id == sub.tier_id {
                return Err(BillingError::Validation(
                    "Downgrade target is the current tier".to_string(),
                ));
            }
            next.pending_change = Some(PendingChange {
                target_tier_id: *target_tier_id,
                change_type: ChangeType::Downgrade,
                scheduled_effective_date: sub.next_billing_date,
                proration_credit_or_charge: credit.clone(),
            });
        }

        (SubscriptionStatus::Active, Transition::ClearPendingChange) => {
            if sub.pending_change.is_none() {
                return Err(BillingError::Validation(
                    "Subscription has no pending change".to_string(),
                ));
            }
            next.pending_change = None;
        }

        (SubscriptionStatus::Active, Transition::SwitchTier { tier_id }) => {
            next.tier_id = *tier_id;
            next.pending_change = None;
        }

        (SubscriptionStatus::Active, Transition::ExecutePendingChange { period }) => {
            let change = sub.pending_change.as_ref().ok_or_else(|| {
                BillingError::State(format!("Subscription {} has no pending change", sub.id))
            })?;
            if change.scheduled_effective_date > now {
                return Err(BillingError::State(format!(
                    "Pending change on {} is not due until {}",
                    sub.id, change.scheduled_effective_date
                )));
            }
            next.tier_id = change.target_tier_id;
            next.pending_change = None;
            next.next_billing_date = period.advance(sub.next_billing_date);
        }

        (
            _,
            Transition::Pause
            | Transition::Resume
            | Transition::Cancel
            | Transition::Expire
            | Transition::ScheduleDowngrade { .. }
            | Transition::ClearPendingChange
            | Transition::SwitchTier { .. }
            | Transition::ExecutePendingChange { .. },
        ) => return Err(invalid(sub, transition)),
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanvault_shared::Currency;
    use time::macros::datetime;
    use time::Duration;

    const NOW: OffsetDateTime = datetime!(2025-04-10 12:00 UTC);

    fn active() -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            status: SubscriptionStatus::Active,
            billing_anchor_date: NOW - Duration::days(20),
            next_billing_date: NOW + Duration::days(10),
            auto_renew: true,
            pending_change: None,
            version: 3,
        }
    }

    fn credit(minor: i64) -> Money {
        Money::new(minor, Currency::new("GHS").unwrap())
    }

    #[test]
    fn test_pause_resume_cycle() {
        let paused = apply(&active(), &Transition::Pause, NOW).unwrap();
        assert_eq!(paused.status, SubscriptionStatus::Paused);
        assert!(!paused.auto_renew);
        assert_eq!(paused.version, 4);

        let resumed = apply(&paused, &Transition::Resume, NOW).unwrap();
        assert_eq!(resumed.status, SubscriptionStatus::Active);
        assert!(resumed.auto_renew);
        assert_eq!(resumed.version, 5);
    }

    #[test]
    fn test_resume_after_period_end_rejected() {
        let paused = apply(&active(), &Transition::Pause, NOW).unwrap();
        let later = NOW + Duration::days(11);
        assert!(matches!(
            apply(&paused, &Transition::Resume, later),
            Err(BillingError::State(_))
        ));
    }

    #[test]
    fn test_cancel_is_terminal() {
        let cancelled = apply(&active(), &Transition::Cancel, NOW).unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(!cancelled.auto_renew);

        for t in [
            Transition::Resume,
            Transition::Pause,
            Transition::Cancel,
            Transition::SwitchTier {
                tier_id: Uuid::new_v4(),
            },
        ] {
            assert!(matches!(
                apply(&cancelled, &t, NOW),
                Err(BillingError::State(_))
            ));
        }
    }

    #[test]
    fn test_expire_only_after_period_end() {
        let cancelled = apply(&active(), &Transition::Cancel, NOW).unwrap();
        assert!(apply(&cancelled, &Transition::Expire, NOW).is_err());

        let later = NOW + Duration::days(10);
        let expired = apply(&cancelled, &Transition::Expire, later).unwrap();
        assert_eq!(expired.status, SubscriptionStatus::Expired);

        assert!(apply(&active(), &Transition::Expire, later).is_err());
    }

    #[test]
    fn test_schedule_downgrade_replaces_previous() {
        let sub = active();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let once = apply(
            &sub,
            &Transition::ScheduleDowngrade {
                target_tier_id: first,
                credit: credit(500),
            },
            NOW,
        )
        .unwrap();
        let twice = apply(
            &once,
            &Transition::ScheduleDowngrade {
                target_tier_id: second,
                credit: credit(200),
            },
            NOW,
        )
        .unwrap();

        let pending = twice.pending_change.unwrap();
        assert_eq!(pending.target_tier_id, second);
        assert_eq!(pending.change_type, ChangeType::Downgrade);
        assert_eq!(pending.scheduled_effective_date, sub.next_billing_date);
        assert_eq!(pending.proration_credit_or_charge.minor, 200);
        assert_eq!(twice.tier_id, sub.tier_id);
    }

    #[test]
    fn test_pause_drops_scheduled_downgrade() {
        let scheduled = apply(
            &active(),
            &Transition::ScheduleDowngrade {
                target_tier_id: Uuid::new_v4(),
                credit: credit(300),
            },
            NOW,
        )
        .unwrap();
        assert!(scheduled.pending_change.is_some());

        let paused = apply(&scheduled, &Transition::Pause, NOW).unwrap();
        assert!(paused.pending_change.is_none());

        // Resuming does not bring it back
        let resumed = apply(&paused, &Transition::Resume, NOW).unwrap();
        assert!(resumed.pending_change.is_none());
        assert_eq!(resumed.tier_id, scheduled.tier_id);
    }

    #[test]
    fn test_schedule_on_paused_rejected() {
        let paused = apply(&active(), &Transition::Pause, NOW).unwrap();
        let result = apply(
            &paused,
            &Transition::ScheduleDowngrade {
                target_tier_id: Uuid::new_v4(),
                credit: credit(0),
            },
            NOW,
        );
        assert!(matches!(result, Err(BillingError::State(_))));
    }

    #[test]
    fn test_clear_pending_change() {
        let sub = active();
        assert!(matches!(
            apply(&sub, &Transition::ClearPendingChange, NOW),
            Err(BillingError::Validation(_))
        ));

        let scheduled = apply(
            &sub,
            &Transition::ScheduleDowngrade {
                target_tier_id: Uuid::new_v4(),
                credit: credit(100),
            },
            NOW,
        )
        .unwrap();
        let cleared = apply(&scheduled, &Transition::ClearPendingChange, NOW).unwrap();
        assert!(cleared.pending_change.is_none());
    }

    #[test]
    fn test_execute_pending_change_advances_billing_date() {
        let sub = active();
        let target = Uuid::new_v4();
        let scheduled = apply(
            &sub,
            &Transition::ScheduleDowngrade {
                target_tier_id: target,
                credit: credit(100),
            },
            NOW,
        )
        .unwrap();
        let period = BillingPeriod::default();

        assert!(apply(
            &scheduled,
            &Transition::ExecutePendingChange { period },
            NOW
        )
        .is_err());

        let due = sub.next_billing_date;
        let executed = apply(&scheduled, &Transition::ExecutePendingChange { period }, due).unwrap();
        assert_eq!(executed.tier_id, target);
        assert!(executed.pending_change.is_none());
        assert_eq!(executed.next_billing_date, due + Duration::days(30));
        assert_eq!(executed.billing_anchor_date, sub.billing_anchor_date);
    }

    #[test]
    fn test_switch_tier_clears_pending() {
        let scheduled = apply(
            &active(),
            &Transition::ScheduleDowngrade {
                target_tier_id: Uuid::new_v4(),
                credit: credit(100),
            },
            NOW,
        )
        .unwrap();
        let new_tier = Uuid::new_v4();
        let switched = apply(&scheduled, &Transition::SwitchTier { tier_id: new_tier }, NOW).unwrap();
        assert_eq!(switched.tier_id, new_tier);
        assert!(switched.pending_change.is_none());
        assert_eq!(switched.next_billing_date, scheduled.next_billing_date);
    }
}
