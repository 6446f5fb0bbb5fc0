//! Subscription management
//!
//! Applies [`lifecycle`](crate::lifecycle) transitions to stored subscriptions.
//! Every write is a compare-and-set on `version`; a lost race re-reads the row
//! and re-applies the transition to the fresh state.

use std::sync::Arc;

use fanvault_shared::Money;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::lifecycle::{self, Transition};
use crate::models::{ChangeType, Subscription, SubscriptionStatus, SubscriptionTier, TierSummary};
use crate::proration::{prorate, Proration};
use crate::store::BillingStore;

/// Attempts before a contended write gives up with `Conflict`
const MAX_CAS_ATTEMPTS: usize = 5;

/// Information about a scheduled downgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledDowngrade {
    pub subscription_id: Uuid,
    pub current_tier: TierSummary,
    pub new_tier: TierSummary,
    #[serde(with = "time::serde::rfc3339")]
    pub effective_date: OffsetDateTime,
    /// Reduction applied to the next invoice
    pub credit: Money,
}

/// Read-only quote for a tier change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProrationPreview {
    pub subscription_id: Uuid,
    pub current_tier: TierSummary,
    pub target_tier: TierSummary,
    pub change_type: ChangeType,
    pub amount: Money,
    pub days_remaining: u32,
    /// Now for upgrades and billing-date switches, otherwise the next billing date
    #[serde(with = "time::serde::rfc3339")]
    pub effective_date: OffsetDateTime,
    /// Applied without a payment or a pending change
    pub immediate: bool,
}

/// What a tier change request turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierChangePlan {
    /// Applied on the spot: a change on the billing date or a free upgrade
    Switched(Subscription),
    /// The prorated upgrade charge must settle before the tier changes
    UpgradePaymentRequired {
        subscription: Subscription,
        target_tier: SubscriptionTier,
        proration: Proration,
    },
    DowngradeScheduled(ScheduledDowngrade),
}

/// Service for the subscription lifecycle
pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
    config: BillingConfig,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn BillingStore>, config: BillingConfig) -> Self {
        Self { store, config }
    }

    /// Fetch a subscription the requester owns
    pub async fn get(&self, subscription_id: Uuid, requester: Uuid) -> BillingResult<Subscription> {
        let subscription = self.load(subscription_id).await?;
        authorize(&subscription, requester)?;
        Ok(subscription)
    }

    pub async fn pause(
        &self,
        subscription_id: Uuid,
        requester: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.transition(subscription_id, Some(requester), Transition::Pause, now)
            .await
    }

    pub async fn resume(
        &self,
        subscription_id: Uuid,
        requester: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.transition(subscription_id, Some(requester), Transition::Resume, now)
            .await
    }

    /// Cancel immediately; access lasts until the paid period ends
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        requester: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.transition(subscription_id, Some(requester), Transition::Cancel, now)
            .await
    }

    /// Drop a scheduled downgrade
    pub async fn cancel_pending_change(
        &self,
        subscription_id: Uuid,
        requester: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.transition(
            subscription_id,
            Some(requester),
            Transition::ClearPendingChange,
            now,
        )
        .await
    }

    pub async fn preview_tier_change(
        &self,
        subscription_id: Uuid,
        requester: Uuid,
        target_tier_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<ProrationPreview> {
        let subscription = self.get(subscription_id, requester).await?;
        let (current, target) = self.change_tiers(&subscription, target_tier_id).await?;
        let proration = prorate(
            &current,
            &target,
            subscription.next_billing_date,
            now,
            self.config.period,
        )?;

        let immediate =
            proration.is_immediate_switch() || (proration.is_upgrade && proration.amount.is_zero());
        let effective_date = if immediate || proration.is_upgrade {
            now
        } else {
            subscription.next_billing_date
        };

        Ok(ProrationPreview {
            subscription_id,
            current_tier: TierSummary::from(&current),
            target_tier: TierSummary::from(&target),
            change_type: proration.change_type(),
            amount: proration.amount,
            days_remaining: proration.days_remaining,
            effective_date,
            immediate,
        })
    }

    /// Start a tier change on an active subscription.
    ///
    /// Downgrades are deferred to the next billing date. Upgrades with a
    /// positive prorated amount return [`TierChangePlan::UpgradePaymentRequired`]
    /// and leave the subscription untouched until the charge settles.
    pub async fn request_tier_change(
        &self,
        subscription_id: Uuid,
        requester: Uuid,
        target_tier_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<TierChangePlan> {
        let subscription = self.get(subscription_id, requester).await?;
        let (current, target) = self.change_tiers(&subscription, target_tier_id).await?;
        let proration = prorate(
            &current,
            &target,
            subscription.next_billing_date,
            now,
            self.config.period,
        )?;

        if proration.is_immediate_switch() || (proration.is_upgrade && proration.amount.is_zero())
        {
            let switched = self
                .transition(
                    subscription_id,
                    Some(requester),
                    Transition::SwitchTier { tier_id: target.id },
                    now,
                )
                .await?;
            tracing::info!(
                subscription_id = %subscription_id,
                from_tier = %current.id,
                to_tier = %target.id,
                days_remaining = proration.days_remaining,
                "Switched tier without proration charge"
            );
            return Ok(TierChangePlan::Switched(switched));
        }

        if proration.is_upgrade {
            return Ok(TierChangePlan::UpgradePaymentRequired {
                subscription,
                target_tier: target,
                proration,
            });
        }

        let scheduled = self
            .transition(
                subscription_id,
                Some(requester),
                Transition::ScheduleDowngrade {
                    target_tier_id: target.id,
                    credit: proration.amount.clone(),
                },
                now,
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription_id,
            current_tier = %current.name,
            new_tier = %target.name,
            effective_date = %scheduled.next_billing_date,
            credit = %proration.amount,
            "Scheduled subscription downgrade for next billing date"
        );

        Ok(TierChangePlan::DowngradeScheduled(ScheduledDowngrade {
            subscription_id,
            current_tier: TierSummary::from(&current),
            new_tier: TierSummary::from(&target),
            effective_date: scheduled.next_billing_date,
            credit: proration.amount,
        }))
    }

    /// Apply `transition` with compare-and-set retries.
    ///
    /// Ownership is checked before state, so a stranger learns nothing about
    /// the subscription's status. `requester = None` is the scheduler.
    pub(crate) async fn transition(
        &self,
        subscription_id: Uuid,
        requester: Option<Uuid>,
        transition: Transition,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.load(subscription_id).await?;
            if let Some(requester) = requester {
                authorize(&current, requester)?;
            }

            let next = lifecycle::apply(&current, &transition, now)?;
            if self
                .store
                .compare_and_swap_subscription(current.version, &next)
                .await?
            {
                tracing::info!(
                    subscription_id = %subscription_id,
                    transition = transition.name(),
                    from_status = %current.status,
                    to_status = %next.status,
                    version = next.version,
                    dropped_pending_change =
                        current.pending_change.is_some() && next.pending_change.is_none(),
                    "Applied subscription transition"
                );
                return Ok(next);
            }

            tracing::debug!(
                subscription_id = %subscription_id,
                transition = transition.name(),
                attempt,
                "Subscription changed concurrently, retrying"
            );
        }

        tracing::warn!(
            subscription_id = %subscription_id,
            transition = transition.name(),
            "Gave up after repeated concurrent modifications"
        );
        Err(BillingError::Conflict(format!(
            "Subscription {} is being modified concurrently",
            subscription_id
        )))
    }

    async fn load(&self, subscription_id: Uuid) -> BillingResult<Subscription> {
        self.store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("Subscription {} not found", subscription_id))
            })
    }

    /// Current and target tiers for a change, after the state checks
    async fn change_tiers(
        &self,
        subscription: &Subscription,
        target_tier_id: Uuid,
    ) -> BillingResult<(SubscriptionTier, SubscriptionTier)> {
        if subscription.status != SubscriptionStatus::Active {
            return Err(BillingError::State(format!(
                "Cannot change tier of a subscription that is {}",
                subscription.status
            )));
        }

        let current = self
            .store
            .get_tier(subscription.tier_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("Tier {} not found", subscription.tier_id))
            })?;
        let target = self
            .store
            .get_tier(target_tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tier {} not found", target_tier_id)))?;

        if target.id != current.id && !target.active {
            return Err(BillingError::Validation(format!(
                "Tier '{}' is not open to new subscriptions",
                target.name
            )));
        }
        Ok((current, target))
    }
}

/// Reject access to another subscriber's subscription
fn authorize(subscription: &Subscription, requester: Uuid) -> BillingResult<()> {
    if subscription.subscriber_id != requester {
        tracing::warn!(
            subscription_id = %subscription.id,
            requester = %requester,
            "Rejected subscription access by non-owner"
        );
        return Err(BillingError::Authorization(
            "Subscription belongs to another subscriber".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use fanvault_shared::Currency;
    use time::macros::datetime;
    use time::Duration;

    const NOW: OffsetDateTime = datetime!(2025-06-01 00:00 UTC);

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: SubscriptionService,
        basic: SubscriptionTier,
        plus: SubscriptionTier,
        subscription: Subscription,
    }

    fn tier(creator_id: Uuid, name: &str, rank: i32, minor: i64) -> SubscriptionTier {
        SubscriptionTier {
            id: Uuid::new_v4(),
            creator_id,
            name: name.to_string(),
            monthly_price: Money::new(minor, Currency::new("GHS").unwrap()),
            rank,
            active: true,
        }
    }

    async fn fixture(days_left: i64) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let creator = Uuid::new_v4();
        let basic = tier(creator, "Basic", 1, 2000);
        let plus = tier(creator, "Plus", 2, 5000);
        store.insert_tier(&basic).await.unwrap();
        store.insert_tier(&plus).await.unwrap();

        let subscription = Subscription {
            id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            creator_id: creator,
            tier_id: plus.id,
            status: SubscriptionStatus::Active,
            billing_anchor_date: NOW - Duration::days(30 - days_left),
            next_billing_date: NOW + Duration::days(days_left),
            auto_renew: true,
            pending_change: None,
            version: 0,
        };
        store.insert_subscription(&subscription).await.unwrap();

        Fixture {
            service: SubscriptionService::new(store.clone(), BillingConfig::default()),
            store,
            basic,
            plus,
            subscription,
        }
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let f = fixture(10).await;
        let owner = f.subscription.subscriber_id;

        let paused = f.service.pause(f.subscription.id, owner, NOW).await.unwrap();
        assert_eq!(paused.status, SubscriptionStatus::Paused);
        assert!(!paused.auto_renew);

        let resumed = f.service.resume(f.subscription.id, owner, NOW).await.unwrap();
        assert_eq!(resumed.status, SubscriptionStatus::Active);
        assert!(resumed.auto_renew);
        assert_eq!(resumed.version, 2);
    }

    #[tokio::test]
    async fn test_authorization_checked_before_state() {
        let f = fixture(10).await;
        let owner = f.subscription.subscriber_id;
        f.service.cancel(f.subscription.id, owner, NOW).await.unwrap();

        // A terminal subscription still answers a stranger with Authorization
        let stranger = Uuid::new_v4();
        let err = f
            .service
            .resume(f.subscription.id, stranger, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Authorization(_)));

        let err = f
            .service
            .resume(f.subscription.id, owner, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::State(_)));
    }

    #[tokio::test]
    async fn test_downgrade_is_scheduled() {
        let f = fixture(7).await;
        let owner = f.subscription.subscriber_id;

        let plan = f
            .service
            .request_tier_change(f.subscription.id, owner, f.basic.id, NOW)
            .await
            .unwrap();

        let scheduled = match plan {
            TierChangePlan::DowngradeScheduled(s) => s,
            other => panic!("expected a scheduled downgrade, got {:?}", other),
        };
        assert_eq!(scheduled.effective_date, f.subscription.next_billing_date);
        assert_eq!(scheduled.credit.minor, 700);

        let stored = f.store.get_subscription(f.subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.tier_id, f.plus.id);
        let pending = stored.pending_change.unwrap();
        assert_eq!(pending.target_tier_id, f.basic.id);
        assert_eq!(pending.change_type, ChangeType::Downgrade);
    }

    #[tokio::test]
    async fn test_cancel_pending_change() {
        let f = fixture(7).await;
        let owner = f.subscription.subscriber_id;

        let err = f
            .service
            .cancel_pending_change(f.subscription.id, owner, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        f.service
            .request_tier_change(f.subscription.id, owner, f.basic.id, NOW)
            .await
            .unwrap();
        let cleared = f
            .service
            .cancel_pending_change(f.subscription.id, owner, NOW)
            .await
            .unwrap();
        assert!(cleared.pending_change.is_none());
        assert_eq!(cleared.tier_id, f.plus.id);
    }

    #[tokio::test]
    async fn test_change_on_billing_date_switches_immediately() {
        let f = fixture(0).await;
        let owner = f.subscription.subscriber_id;

        let plan = f
            .service
            .request_tier_change(f.subscription.id, owner, f.basic.id, NOW)
            .await
            .unwrap();
        match plan {
            TierChangePlan::Switched(sub) => {
                assert_eq!(sub.tier_id, f.basic.id);
                assert!(sub.pending_change.is_none());
            }
            other => panic!("expected an immediate switch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tier_change_rejected_when_paused() {
        let f = fixture(7).await;
        let owner = f.subscription.subscriber_id;
        f.service.pause(f.subscription.id, owner, NOW).await.unwrap();

        let err = f
            .service
            .request_tier_change(f.subscription.id, owner, f.basic.id, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::State(_)));
    }

    #[tokio::test]
    async fn test_preview_upgrade() {
        let f = fixture(10).await;
        let owner = f.subscription.subscriber_id;

        // Drop to Basic first so Plus is an upgrade
        f.store
            .compare_and_swap_subscription(
                0,
                &Subscription {
                    tier_id: f.basic.id,
                    version: 1,
                    ..f.subscription.clone()
                },
            )
            .await
            .unwrap();

        let preview = f
            .service
            .preview_tier_change(f.subscription.id, owner, f.plus.id, NOW)
            .await
            .unwrap();
        assert_eq!(preview.change_type, ChangeType::Upgrade);
        assert_eq!(preview.amount.to_string(), "GHS 10.00");
        assert_eq!(preview.days_remaining, 10);
        assert!(!preview.immediate);

        // Preview writes nothing
        let stored = f.store.get_subscription(f.subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_inactive_target_tier_rejected() {
        let f = fixture(10).await;
        let owner = f.subscription.subscriber_id;
        let mut retired = f.basic.clone();
        retired.active = false;
        f.store.update_tier(&retired).await.unwrap();

        let err = f
            .service
            .request_tier_change(f.subscription.id, owner, f.basic.id, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }
}
