//! Persistence for the billing core
//!
//! Services hold an `Arc<dyn BillingStore>`. Two implementations ship:
//! [`PgStore`] for production and [`InMemoryStore`] for tests and local runs.
//! Both give the same guarantees:
//!
//! - subscription writes are compare-and-set on `version`;
//! - [`BillingStore::claim_and_apply`] flips an intent from `pending` to
//!   `settled`, performs the settlement side effect and appends the audit
//!   record as one atomic unit, or does nothing at all;
//! - at most one `active` subscription per (subscriber, creator) and one PPV
//!   purchase per (subscriber, post).

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{
    PaymentIntent, PpvPurchase, SettlementOutcome, SettlementRecord, Subscription,
    SubscriptionTier,
};

/// The side effect a settled payment applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementPlan {
    /// Insert a freshly activated subscription unless the pair already has
    /// an active or paused one
    ActivateSubscription(Subscription),
    /// Switch an active subscription to a tier ranked above the one it holds
    /// at claim time, dropping its pending change
    UpgradeTier { subscription_id: Uuid, tier_id: Uuid },
    /// Record a PPV unlock unless one already exists
    UnlockPost(PpvPurchase),
}

/// Result of an atomic claim attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller moved the intent out of `pending` and applied the plan
    Applied(SettlementOutcome),
    /// The intent was no longer pending; nothing was written
    AlreadyClaimed,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Tiers

    /// Fails with `Conflict` when the creator already has a tier at that rank
    async fn insert_tier(&self, tier: &SubscriptionTier) -> BillingResult<()>;

    async fn get_tier(&self, id: Uuid) -> BillingResult<Option<SubscriptionTier>>;

    /// A creator's tiers ordered by ascending rank
    async fn list_creator_tiers(&self, creator_id: Uuid) -> BillingResult<Vec<SubscriptionTier>>;

    /// Overwrite name, price and active flag. Returns `false` for an unknown tier.
    async fn update_tier(&self, tier: &SubscriptionTier) -> BillingResult<bool>;

    /// Returns `false` for an unknown tier. Fails with `Conflict` while a
    /// non-expired subscription, a pending change or a pending payment
    /// references it.
    async fn delete_tier(&self, id: Uuid) -> BillingResult<bool>;

    // Subscriptions

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>>;

    /// The pair's `active` or `paused` subscription, if any
    async fn find_live_subscription(
        &self,
        subscriber_id: Uuid,
        creator_id: Uuid,
    ) -> BillingResult<Option<Subscription>>;

    /// Every subscription of the pair that grants access at `now`
    async fn list_entitling_subscriptions(
        &self,
        subscriber_id: Uuid,
        creator_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>>;

    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()>;

    /// Replace the stored row only if its version still equals
    /// `expected_version`. Returns `false` when another writer got there first.
    async fn compare_and_swap_subscription(
        &self,
        expected_version: i64,
        updated: &Subscription,
    ) -> BillingResult<bool>;

    /// Paused or cancelled subscriptions whose paid period has ended, plus
    /// active ones with a pending change due at `now`
    async fn list_due_subscriptions(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>>;

    // Payment intents

    /// Fails with `Conflict` on a duplicate reference
    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> BillingResult<()>;

    async fn get_payment_intent(&self, reference: &str) -> BillingResult<Option<PaymentIntent>>;

    /// Conditionally move a pending intent to `failed` and append a
    /// `PaymentFailed` record. Returns `false` if it was no longer pending.
    async fn fail_payment_intent(
        &self,
        reference: &str,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> BillingResult<bool>;

    /// Claim a pending intent and apply `plan` atomically
    async fn claim_and_apply(
        &self,
        reference: &str,
        plan: SettlementPlan,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> BillingResult<ClaimOutcome>;

    // PPV ledger and audit

    async fn get_ppv_purchase(
        &self,
        subscriber_id: Uuid,
        post_id: Uuid,
    ) -> BillingResult<Option<PpvPurchase>>;

    /// Settlement records of an intent, oldest first
    async fn settlement_records(&self, reference: &str) -> BillingResult<Vec<SettlementRecord>>;
}
