//! In-memory billing store
//!
//! A single tokio mutex guards all tables, so every trait method is atomic
//! with respect to every other one. The uniqueness rules of the Postgres
//! schema are checked explicitly and reported with the same error variants.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BillingStore, ClaimOutcome, SettlementPlan};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    PaymentIntent, PaymentStatus, PpvPurchase, SettlementOutcome, SettlementRecord, Subscription,
    SubscriptionStatus, SubscriptionTier,
};

#[derive(Default)]
struct Inner {
    tiers: HashMap<Uuid, SubscriptionTier>,
    subscriptions: HashMap<Uuid, Subscription>,
    intents: HashMap<String, PaymentIntent>,
    ppv_purchases: HashMap<(Uuid, Uuid), PpvPurchase>,
    settlement_log: Vec<SettlementRecord>,
}

impl Inner {
    fn active_for_pair(&self, subscriber_id: Uuid, creator_id: Uuid) -> Option<&Subscription> {
        self.subscriptions.values().find(|s| {
            s.subscriber_id == subscriber_id
                && s.creator_id == creator_id
                && s.status == SubscriptionStatus::Active
        })
    }

    /// Active or paused: either one blocks a second paid subscription
    fn live_for_pair(&self, subscriber_id: Uuid, creator_id: Uuid) -> Option<&Subscription> {
        self.subscriptions.values().find(|s| {
            s.subscriber_id == subscriber_id
                && s.creator_id == creator_id
                && matches!(
                    s.status,
                    SubscriptionStatus::Active | SubscriptionStatus::Paused
                )
        })
    }

    fn rank_of(&self, tier_id: Uuid) -> Option<i32> {
        self.tiers.get(&tier_id).map(|t| t.rank)
    }

    fn append_record(
        &mut self,
        reference: &str,
        outcome: SettlementOutcome,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) {
        self.settlement_log.push(SettlementRecord {
            id: Uuid::new_v4(),
            reference: reference.to_string(),
            outcome,
            detail,
            recorded_at: now,
        });
    }
}

/// Mutex-backed [`BillingStore`] for tests and local development
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn insert_tier(&self, tier: &SubscriptionTier) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.tiers.contains_key(&tier.id) {
            return Err(BillingError::Conflict(format!("Tier {} already exists", tier.id)));
        }
        if inner
            .tiers
            .values()
            .any(|t| t.creator_id == tier.creator_id && t.rank == tier.rank)
        {
            return Err(BillingError::Conflict(format!(
                "Creator already has a tier at rank {}",
                tier.rank
            )));
        }
        inner.tiers.insert(tier.id, tier.clone());
        Ok(())
    }

    async fn get_tier(&self, id: Uuid) -> BillingResult<Option<SubscriptionTier>> {
        Ok(self.inner.lock().await.tiers.get(&id).cloned())
    }

    async fn list_creator_tiers(&self, creator_id: Uuid) -> BillingResult<Vec<SubscriptionTier>> {
        let inner = self.inner.lock().await;
        let mut tiers: Vec<SubscriptionTier> = inner
            .tiers
            .values()
            .filter(|t| t.creator_id == creator_id)
            .cloned()
            .collect();
        tiers.sort_by_key(|t| t.rank);
        Ok(tiers)
    }

    async fn update_tier(&self, tier: &SubscriptionTier) -> BillingResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.tiers.get_mut(&tier.id) {
            Some(stored) => {
                stored.name = tier.name.clone();
                stored.monthly_price = tier.monthly_price.clone();
                stored.active = tier.active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_tier(&self, id: Uuid) -> BillingResult<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.tiers.contains_key(&id) {
            return Ok(false);
        }
        let referenced = inner.subscriptions.values().any(|s| {
            s.status != SubscriptionStatus::Expired
                && (s.tier_id == id
                    || s.pending_change
                        .as_ref()
                        .is_some_and(|p| p.target_tier_id == id))
        });
        let awaiting_payment = inner.intents.values().any(|i| {
            i.status == PaymentStatus::Pending && i.related_tier_id == Some(id)
        });
        if referenced || awaiting_payment {
            return Err(BillingError::Conflict(format!(
                "Tier {} is still referenced by a subscription or payment",
                id
            )));
        }
        inner.tiers.remove(&id);
        Ok(true)
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.inner.lock().await.subscriptions.get(&id).cloned())
    }

    async fn find_live_subscription(
        &self,
        subscriber_id: Uuid,
        creator_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let inner = self.inner.lock().await;
        let mut live: Vec<&Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| {
                s.subscriber_id == subscriber_id
                    && s.creator_id == creator_id
                    && matches!(
                        s.status,
                        SubscriptionStatus::Active | SubscriptionStatus::Paused
                    )
            })
            .collect();
        // Prefer the active row when a paused one lingers beside it
        live.sort_by_key(|s| s.status != SubscriptionStatus::Active);
        Ok(live.first().map(|s| (*s).clone()))
    }

    async fn list_entitling_subscriptions(
        &self,
        subscriber_id: Uuid,
        creator_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| {
                s.subscriber_id == subscriber_id
                    && s.creator_id == creator_id
                    && s.is_entitled_at(now)
            })
            .cloned()
            .collect())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.subscriptions.contains_key(&subscription.id) {
            return Err(BillingError::Conflict(format!(
                "Subscription {} already exists",
                subscription.id
            )));
        }
        if subscription.status == SubscriptionStatus::Active
            && inner
                .active_for_pair(subscription.subscriber_id, subscription.creator_id)
                .is_some()
        {
            return Err(BillingError::Conflict(
                "Subscriber already has an active subscription to this creator".to_string(),
            ));
        }
        inner
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn compare_and_swap_subscription(
        &self,
        expected_version: i64,
        updated: &Subscription,
    ) -> BillingResult<bool> {
        let mut inner = self.inner.lock().await;
        let current_version = match inner.subscriptions.get(&updated.id) {
            Some(stored) => stored.version,
            None => return Ok(false),
        };
        if current_version != expected_version {
            return Ok(false);
        }
        if updated.status == SubscriptionStatus::Active {
            if let Some(other) = inner.active_for_pair(updated.subscriber_id, updated.creator_id) {
                if other.id != updated.id {
                    return Err(BillingError::Conflict(
                        "Subscriber already has an active subscription to this creator"
                            .to_string(),
                    ));
                }
            }
        }
        inner.subscriptions.insert(updated.id, updated.clone());
        Ok(true)
    }

    async fn list_due_subscriptions(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| match s.status {
                SubscriptionStatus::Paused | SubscriptionStatus::Cancelled => {
                    s.next_billing_date <= now
                }
                SubscriptionStatus::Active => s
                    .pending_change
                    .as_ref()
                    .is_some_and(|p| p.scheduled_effective_date <= now),
                SubscriptionStatus::Expired => false,
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_billing_date);
        Ok(due)
    }

    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.intents.contains_key(&intent.reference) {
            return Err(BillingError::Conflict(format!(
                "Payment reference {} already exists",
                intent.reference
            )));
        }
        inner
            .intents
            .insert(intent.reference.clone(), intent.clone());
        Ok(())
    }

    async fn get_payment_intent(&self, reference: &str) -> BillingResult<Option<PaymentIntent>> {
        Ok(self.inner.lock().await.intents.get(reference).cloned())
    }

    async fn fail_payment_intent(
        &self,
        reference: &str,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut inner = self.inner.lock().await;
        let intent = inner
            .intents
            .get_mut(reference)
            .ok_or_else(|| BillingError::unknown_reference(reference))?;
        if intent.status != PaymentStatus::Pending {
            return Ok(false);
        }
        intent.status = PaymentStatus::Failed;
        inner.append_record(reference, SettlementOutcome::PaymentFailed, detail, now);
        Ok(true)
    }

    async fn claim_and_apply(
        &self,
        reference: &str,
        plan: SettlementPlan,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> BillingResult<ClaimOutcome> {
        let mut inner = self.inner.lock().await;
        let status = inner
            .intents
            .get(reference)
            .map(|i| i.status)
            .ok_or_else(|| BillingError::unknown_reference(reference))?;
        if status != PaymentStatus::Pending {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let outcome = match plan {
            SettlementPlan::ActivateSubscription(subscription) => {
                match inner.live_for_pair(subscription.subscriber_id, subscription.creator_id) {
                    Some(existing) => SettlementOutcome::DuplicateSubscription {
                        existing_subscription_id: existing.id,
                    },
                    None => {
                        let outcome = SettlementOutcome::SubscriptionActivated {
                            subscription_id: subscription.id,
                            tier_id: subscription.tier_id,
                        };
                        inner.subscriptions.insert(subscription.id, subscription);
                        outcome
                    }
                }
            }
            SettlementPlan::UpgradeTier {
                subscription_id,
                tier_id,
            } => {
                // Only a strictly higher rank than the tier held right now
                let raises_rank = inner
                    .subscriptions
                    .get(&subscription_id)
                    .and_then(|s| inner.rank_of(s.tier_id))
                    .zip(inner.rank_of(tier_id))
                    .is_some_and(|(held, target)| target > held);
                match inner.subscriptions.get_mut(&subscription_id) {
                    Some(s) if s.status == SubscriptionStatus::Active && raises_rank => {
                        s.tier_id = tier_id;
                        s.pending_change = None;
                        s.version += 1;
                        SettlementOutcome::TierUpgraded {
                            subscription_id,
                            tier_id,
                        }
                    }
                    _ => SettlementOutcome::UpgradeNotApplied { subscription_id },
                }
            }
            SettlementPlan::UnlockPost(purchase) => {
                let key = (purchase.subscriber_id, purchase.post_id);
                let post_id = purchase.post_id;
                if inner.ppv_purchases.contains_key(&key) {
                    SettlementOutcome::AlreadyGranted { post_id }
                } else {
                    inner.ppv_purchases.insert(key, purchase);
                    SettlementOutcome::PpvUnlocked { post_id }
                }
            }
        };

        if let Some(intent) = inner.intents.get_mut(reference) {
            intent.status = PaymentStatus::Settled;
            intent.settled_at = Some(now);
        }
        inner.append_record(reference, outcome.clone(), detail, now);

        Ok(ClaimOutcome::Applied(outcome))
    }

    async fn get_ppv_purchase(
        &self,
        subscriber_id: Uuid,
        post_id: Uuid,
    ) -> BillingResult<Option<PpvPurchase>> {
        Ok(self
            .inner
            .lock()
            .await
            .ppv_purchases
            .get(&(subscriber_id, post_id))
            .cloned())
    }

    async fn settlement_records(&self, reference: &str) -> BillingResult<Vec<SettlementRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .settlement_log
            .iter()
            .filter(|r| r.reference == reference)
            .cloned()
            .collect())
    }
}
