//! Billing entities
//!
//! One struct per persisted record plus the tagged enums for their states.
//! Every enum is matched exhaustively by the services that consume it.

use fanvault_shared::Money;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A creator-configured subscription tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTier {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    pub monthly_price: Money,
    /// Strictly orders a creator's tiers from lowest to highest
    pub rank: i32,
    pub active: bool,
}

/// Short description of a tier for API responses and denials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSummary {
    pub id: Uuid,
    pub name: String,
    pub rank: i32,
}

impl From<&SubscriptionTier> for TierSummary {
    fn from(tier: &SubscriptionTier) -> Self {
        Self {
            id: tier.id,
            name: tier.name.clone(),
            rank: tier.rank,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> BillingResult<Self> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(BillingError::Database(format!(
                "Unknown subscription status '{}'",
                other
            ))),
        }
    }

    /// Terminal records are never reactivated; resubscribing creates a new row
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Upgrade,
    Downgrade,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Upgrade => "upgrade",
            ChangeType::Downgrade => "downgrade",
        }
    }

    pub fn parse(s: &str) -> BillingResult<Self> {
        match s {
            "upgrade" => Ok(ChangeType::Upgrade),
            "downgrade" => Ok(ChangeType::Downgrade),
            other => Err(BillingError::Database(format!(
                "Unknown change type '{}'",
                other
            ))),
        }
    }
}

/// A tier change deferred to the next billing date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub target_tier_id: Uuid,
    pub change_type: ChangeType,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_effective_date: OffsetDateTime,
    /// Credit (downgrade) applied to the next invoice
    pub proration_credit_or_charge: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub creator_id: Uuid,
    pub tier_id: Uuid,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub billing_anchor_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub next_billing_date: OffsetDateTime,
    pub auto_renew: bool,
    pub pending_change: Option<PendingChange>,
    /// Optimistic-lock counter, bumped by every write
    pub version: i64,
}

impl Subscription {
    /// Whether this record grants access at `now`.
    ///
    /// Active subscriptions always entitle. Paused and cancelled ones keep
    /// access until the paid period ends.
    pub fn is_entitled_at(&self, now: OffsetDateTime) -> bool {
        match self.status {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Paused | SubscriptionStatus::Cancelled => {
                self.next_billing_date > now
            }
            SubscriptionStatus::Expired => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    NewSubscription,
    TierUpgrade,
    PpvPurchase,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::NewSubscription => "new_subscription",
            PaymentPurpose::TierUpgrade => "tier_upgrade",
            PaymentPurpose::PpvPurchase => "ppv_purchase",
        }
    }

    pub fn parse(s: &str) -> BillingResult<Self> {
        match s {
            "new_subscription" => Ok(PaymentPurpose::NewSubscription),
            "tier_upgrade" => Ok(PaymentPurpose::TierUpgrade),
            "ppv_purchase" => Ok(PaymentPurpose::PpvPurchase),
            other => Err(BillingError::Database(format!(
                "Unknown payment purpose '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Settled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Settled => "settled",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> BillingResult<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "settled" => Ok(PaymentStatus::Settled),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(BillingError::Database(format!(
                "Unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// A charge created before the gateway redirect; `reference` is the
/// settlement idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub reference: String,
    pub subscriber_id: Uuid,
    pub purpose: PaymentPurpose,
    pub amount: Money,
    /// Pre-allocated id for `new_subscription`, target for `tier_upgrade`
    pub related_subscription_id: Option<Uuid>,
    pub related_post_id: Option<Uuid>,
    pub related_tier_id: Option<Uuid>,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub settled_at: Option<OffsetDateTime>,
}

impl PaymentIntent {
    pub fn require_subscription_id(&self) -> BillingResult<Uuid> {
        self.related_subscription_id.ok_or_else(|| {
            BillingError::Database(format!(
                "Payment intent {} has no related subscription",
                self.reference
            ))
        })
    }

    pub fn require_tier_id(&self) -> BillingResult<Uuid> {
        self.related_tier_id.ok_or_else(|| {
            BillingError::Database(format!(
                "Payment intent {} has no related tier",
                self.reference
            ))
        })
    }

    pub fn require_post_id(&self) -> BillingResult<Uuid> {
        self.related_post_id.ok_or_else(|| {
            BillingError::Database(format!(
                "Payment intent {} has no related post",
                self.reference
            ))
        })
    }
}

/// A one-off unlock of a single post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpvPurchase {
    pub subscriber_id: Uuid,
    pub post_id: Uuid,
    pub amount: Money,
    #[serde(with = "time::serde::rfc3339")]
    pub settled_at: OffsetDateTime,
    pub payment_reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostVisibility {
    Public,
    Subscribers,
}

/// The access-relevant view of a post, supplied by the content layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub visibility: PostVisibility,
    #[serde(default)]
    pub ppv_enabled: bool,
    #[serde(default)]
    pub ppv_price: Option<Money>,
    /// When unset, the creator's lowest-rank tier is required
    #[serde(default)]
    pub required_tier_id: Option<Uuid>,
}

/// What a settlement did, stored in the audit log and replayed verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementOutcome {
    SubscriptionActivated {
        subscription_id: Uuid,
        tier_id: Uuid,
    },
    /// Paid for a second active subscription to the same creator; needs a refund
    DuplicateSubscription {
        existing_subscription_id: Uuid,
    },
    TierUpgraded {
        subscription_id: Uuid,
        tier_id: Uuid,
    },
    /// The subscription left `active` before the upgrade payment landed
    UpgradeNotApplied {
        subscription_id: Uuid,
    },
    PpvUnlocked {
        post_id: Uuid,
    },
    /// Another settlement unlocked the same post first
    AlreadyGranted {
        post_id: Uuid,
    },
    PaymentFailed,
    /// Gateway has not confirmed the charge yet
    AwaitingPayment,
}

impl SettlementOutcome {
    /// Whether the payer now holds the access they paid for
    pub fn access_granted(&self) -> bool {
        match self {
            SettlementOutcome::SubscriptionActivated { .. }
            | SettlementOutcome::DuplicateSubscription { .. }
            | SettlementOutcome::TierUpgraded { .. }
            | SettlementOutcome::PpvUnlocked { .. }
            | SettlementOutcome::AlreadyGranted { .. } => true,
            SettlementOutcome::UpgradeNotApplied { .. }
            | SettlementOutcome::PaymentFailed
            | SettlementOutcome::AwaitingPayment => false,
        }
    }

    /// Money was taken but nothing new was granted
    pub fn requires_refund_review(&self) -> bool {
        matches!(
            self,
            SettlementOutcome::DuplicateSubscription { .. }
                | SettlementOutcome::UpgradeNotApplied { .. }
                | SettlementOutcome::AlreadyGranted { .. }
        )
    }
}

/// Append-only audit entry written alongside every settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub reference: String,
    pub outcome: SettlementOutcome,
    pub detail: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanvault_shared::Currency;
    use time::macros::datetime;

    fn subscription(status: SubscriptionStatus) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            status,
            billing_anchor_date: datetime!(2025-01-01 00:00 UTC),
            next_billing_date: datetime!(2025-01-31 00:00 UTC),
            auto_renew: true,
            pending_change: None,
            version: 0,
        }
    }

    #[test]
    fn test_entitlement_window() {
        let before = datetime!(2025-01-20 00:00 UTC);
        let after = datetime!(2025-02-01 00:00 UTC);

        assert!(subscription(SubscriptionStatus::Active).is_entitled_at(after));
        assert!(subscription(SubscriptionStatus::Paused).is_entitled_at(before));
        assert!(!subscription(SubscriptionStatus::Paused).is_entitled_at(after));
        assert!(subscription(SubscriptionStatus::Cancelled).is_entitled_at(before));
        assert!(!subscription(SubscriptionStatus::Cancelled).is_entitled_at(after));
        assert!(!subscription(SubscriptionStatus::Expired).is_entitled_at(before));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SubscriptionStatus::parse("canceled").is_err());
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let post_id = Uuid::nil();
        let json = serde_json::to_value(SettlementOutcome::PpvUnlocked { post_id }).unwrap();
        assert_eq!(json["kind"], "ppv_unlocked");
    }

    #[test]
    fn test_post_defaults() {
        let post: Post = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "creator_id": Uuid::new_v4(),
            "visibility": "public",
        }))
        .unwrap();
        assert!(!post.ppv_enabled);
        assert!(post.ppv_price.is_none());

        let price = Money::new(1000, Currency::new("GHS").unwrap());
        assert!(price.is_positive());
    }
}
