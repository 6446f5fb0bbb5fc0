//! Checkout initiation
//!
//! Creates the [`PaymentIntent`] first and only then asks the gateway for a
//! hosted charge, so every reference the gateway can ever report back is
//! already known locally. An intent whose charge is never completed stays
//! `pending` forever and grants nothing.

use std::sync::Arc;

use fanvault_shared::Money;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::{ChargeRequest, PaymentGateway};
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    PaymentIntent, PaymentPurpose, PaymentStatus, Post, Subscription, SubscriptionStatus,
};
use crate::store::BillingStore;
use crate::subscriptions::{ScheduledDowngrade, SubscriptionService, TierChangePlan};

/// Request to subscribe to a creator's tier
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub subscriber_id: Uuid,
    pub email: String,
    pub tier_id: Uuid,
}

/// Request to unlock a single post
#[derive(Debug, Clone)]
pub struct PpvRequest {
    pub subscriber_id: Uuid,
    pub email: String,
    pub post: Post,
}

/// Outcome of an initiation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitiationResult {
    /// Send the payer to `authorization_url`; settlement happens later
    PaymentRequired {
        intent: PaymentIntent,
        authorization_url: String,
    },
    /// An existing subscription changed tier with nothing to pay
    TierSwitched { subscription: Subscription },
    /// An existing subscription will drop to the lower tier on its billing date
    DowngradeScheduled { downgrade: ScheduledDowngrade },
}

/// Starts subscription and PPV purchases
pub struct CheckoutService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    subscriptions: SubscriptionService,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: BillingConfig,
    ) -> Self {
        Self {
            subscriptions: SubscriptionService::new(store.clone(), config),
            store,
            gateway,
        }
    }

    /// Subscribe to a tier, or route to a tier change when the subscriber
    /// already holds an active subscription to the creator.
    pub async fn initiate_subscription(
        &self,
        request: SubscribeRequest,
        now: OffsetDateTime,
    ) -> BillingResult<InitiationResult> {
        let tier = self
            .store
            .get_tier(request.tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tier {} not found", request.tier_id)))?;

        if !tier.active {
            return Err(BillingError::Validation(format!(
                "Tier '{}' is not open to new subscriptions",
                tier.name
            )));
        }
        if tier.creator_id == request.subscriber_id {
            return Err(BillingError::Validation(
                "Creators cannot subscribe to themselves".to_string(),
            ));
        }

        let live = self
            .store
            .find_live_subscription(request.subscriber_id, tier.creator_id)
            .await?;

        match live {
            Some(existing) if existing.status == SubscriptionStatus::Paused => {
                Err(BillingError::Conflict(format!(
                    "Subscription {} is paused; resume it instead of subscribing again",
                    existing.id
                )))
            }
            Some(existing) if existing.tier_id == tier.id => Err(BillingError::Validation(
                format!("Already subscribed to tier '{}'", tier.name),
            )),
            Some(existing) => {
                tracing::info!(
                    subscriber_id = %request.subscriber_id,
                    subscription_id = %existing.id,
                    target_tier = %tier.id,
                    "Routing subscription request to tier change"
                );
                self.route_tier_change(&request, existing, now).await
            }
            None => {
                let intent = PaymentIntent {
                    reference: new_reference(),
                    subscriber_id: request.subscriber_id,
                    purpose: PaymentPurpose::NewSubscription,
                    amount: tier.monthly_price.clone(),
                    related_subscription_id: Some(Uuid::new_v4()),
                    related_post_id: None,
                    related_tier_id: Some(tier.id),
                    status: PaymentStatus::Pending,
                    created_at: now,
                    settled_at: None,
                };
                self.charge(intent, &request.email).await
            }
        }
    }

    /// Unlock a PPV post
    pub async fn initiate_ppv(
        &self,
        request: PpvRequest,
        now: OffsetDateTime,
    ) -> BillingResult<InitiationResult> {
        let post = &request.post;
        let price = ppv_price(post)?;

        if post.creator_id == request.subscriber_id {
            return Err(BillingError::Validation(
                "Creators cannot purchase their own posts".to_string(),
            ));
        }
        if self
            .store
            .get_ppv_purchase(request.subscriber_id, post.id)
            .await?
            .is_some()
        {
            return Err(BillingError::Conflict(format!(
                "Post {} is already unlocked",
                post.id
            )));
        }

        let intent = PaymentIntent {
            reference: new_reference(),
            subscriber_id: request.subscriber_id,
            purpose: PaymentPurpose::PpvPurchase,
            amount: price,
            related_subscription_id: None,
            related_post_id: Some(post.id),
            related_tier_id: None,
            status: PaymentStatus::Pending,
            created_at: now,
            settled_at: None,
        };
        self.charge(intent, &request.email).await
    }

    async fn route_tier_change(
        &self,
        request: &SubscribeRequest,
        existing: Subscription,
        now: OffsetDateTime,
    ) -> BillingResult<InitiationResult> {
        let plan = self
            .subscriptions
            .request_tier_change(existing.id, request.subscriber_id, request.tier_id, now)
            .await?;

        match plan {
            TierChangePlan::Switched(subscription) => {
                Ok(InitiationResult::TierSwitched { subscription })
            }
            TierChangePlan::DowngradeScheduled(downgrade) => {
                Ok(InitiationResult::DowngradeScheduled { downgrade })
            }
            TierChangePlan::UpgradePaymentRequired {
                subscription,
                target_tier,
                proration,
            } => {
                let intent = PaymentIntent {
                    reference: new_reference(),
                    subscriber_id: request.subscriber_id,
                    purpose: PaymentPurpose::TierUpgrade,
                    amount: proration.amount,
                    related_subscription_id: Some(subscription.id),
                    related_post_id: None,
                    related_tier_id: Some(target_tier.id),
                    status: PaymentStatus::Pending,
                    created_at: now,
                    settled_at: None,
                };
                self.charge(intent, &request.email).await
            }
        }
    }

    /// Persist the intent, then open the gateway charge
    async fn charge(&self, intent: PaymentIntent, email: &str) -> BillingResult<InitiationResult> {
        self.store.insert_payment_intent(&intent).await?;

        let request = ChargeRequest {
            reference: intent.reference.clone(),
            email: email.to_string(),
            amount: intent.amount.clone(),
            metadata: serde_json::json!({
                "purpose": intent.purpose.as_str(),
                "subscriber_id": intent.subscriber_id,
                "subscription_id": intent.related_subscription_id,
                "tier_id": intent.related_tier_id,
                "post_id": intent.related_post_id,
            }),
        };

        let session = self.gateway.initiate_charge(&request).await.map_err(|e| {
            tracing::error!(
                reference = %intent.reference,
                error = %e,
                "Gateway charge initiation failed; intent left pending"
            );
            e
        })?;

        if session.reference != intent.reference {
            tracing::error!(
                expected = %intent.reference,
                received = %session.reference,
                "Gateway echoed a different reference"
            );
            return Err(BillingError::Gateway(
                "Gateway returned a mismatched reference".to_string(),
            ));
        }

        tracing::info!(
            reference = %intent.reference,
            subscriber_id = %intent.subscriber_id,
            purpose = intent.purpose.as_str(),
            amount = %intent.amount,
            "Created payment intent"
        );

        Ok(InitiationResult::PaymentRequired {
            intent,
            authorization_url: session.authorization_url,
        })
    }
}

fn ppv_price(post: &Post) -> BillingResult<Money> {
    if !post.ppv_enabled {
        return Err(BillingError::Validation(format!(
            "Post {} is not sold individually",
            post.id
        )));
    }
    match &post.ppv_price {
        Some(price) if price.is_positive() => Ok(price.clone()),
        _ => Err(BillingError::Validation(format!(
            "Post {} has no valid PPV price",
            post.id
        ))),
    }
}

fn new_reference() -> String {
    format!("fv_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChargeSession, VerifiedCharge};
    use crate::models::{PostVisibility, SubscriptionTier};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use fanvault_shared::Currency;
    use time::macros::datetime;
    use time::Duration;

    const NOW: OffsetDateTime = datetime!(2025-06-01 00:00 UTC);

    struct EchoGateway;

    #[async_trait]
    impl PaymentGateway for EchoGateway {
        async fn initiate_charge(&self, request: &ChargeRequest) -> BillingResult<ChargeSession> {
            Ok(ChargeSession {
                authorization_url: format!("https://checkout.test/{}", request.reference),
                reference: request.reference.clone(),
            })
        }

        async fn verify_charge(&self, _reference: &str) -> BillingResult<VerifiedCharge> {
            Err(BillingError::Gateway("not used".to_string()))
        }
    }

    fn ghs(minor: i64) -> Money {
        Money::new(minor, Currency::new("GHS").unwrap())
    }

    async fn setup() -> (Arc<InMemoryStore>, CheckoutService, SubscriptionTier, SubscriptionTier) {
        let store = Arc::new(InMemoryStore::new());
        let creator = Uuid::new_v4();
        let basic = SubscriptionTier {
            id: Uuid::new_v4(),
            creator_id: creator,
            name: "Basic".to_string(),
            monthly_price: ghs(2000),
            rank: 1,
            active: true,
        };
        let plus = SubscriptionTier {
            id: Uuid::new_v4(),
            name: "Plus".to_string(),
            monthly_price: ghs(5000),
            rank: 2,
            ..basic.clone()
        };
        store.insert_tier(&basic).await.unwrap();
        store.insert_tier(&plus).await.unwrap();

        let service =
            CheckoutService::new(store.clone(), Arc::new(EchoGateway), BillingConfig::default());
        (store, service, basic, plus)
    }

    fn active_subscription(subscriber: Uuid, tier: &SubscriptionTier) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            subscriber_id: subscriber,
            creator_id: tier.creator_id,
            tier_id: tier.id,
            status: SubscriptionStatus::Active,
            billing_anchor_date: NOW - Duration::days(20),
            next_billing_date: NOW + Duration::days(10),
            auto_renew: true,
            pending_change: None,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_new_subscription_creates_pending_intent() {
        let (store, service, basic, _) = setup().await;
        let subscriber = Uuid::new_v4();

        let result = service
            .initiate_subscription(
                SubscribeRequest {
                    subscriber_id: subscriber,
                    email: "fan@example.com".to_string(),
                    tier_id: basic.id,
                },
                NOW,
            )
            .await
            .unwrap();

        let intent = match result {
            InitiationResult::PaymentRequired {
                intent,
                authorization_url,
            } => {
                assert!(authorization_url.ends_with(&intent.reference));
                intent
            }
            other => panic!("expected payment, got {:?}", other),
        };
        assert_eq!(intent.purpose, PaymentPurpose::NewSubscription);
        assert_eq!(intent.amount, ghs(2000));
        assert!(intent.related_subscription_id.is_some());

        let stored = store.get_payment_intent(&intent.reference).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        // Nothing is granted before settlement
        assert!(store
            .find_live_subscription(subscriber, basic.creator_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_active_subscriber_is_routed_to_upgrade() {
        let (store, service, basic, plus) = setup().await;
        let subscriber = Uuid::new_v4();
        let existing = active_subscription(subscriber, &basic);
        store.insert_subscription(&existing).await.unwrap();

        let result = service
            .initiate_subscription(
                SubscribeRequest {
                    subscriber_id: subscriber,
                    email: "fan@example.com".to_string(),
                    tier_id: plus.id,
                },
                NOW,
            )
            .await
            .unwrap();

        match result {
            InitiationResult::PaymentRequired { intent, .. } => {
                assert_eq!(intent.purpose, PaymentPurpose::TierUpgrade);
                assert_eq!(intent.amount.to_string(), "GHS 10.00");
                assert_eq!(intent.related_subscription_id, Some(existing.id));
                assert_eq!(intent.related_tier_id, Some(plus.id));
            }
            other => panic!("expected upgrade payment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_active_subscriber_is_routed_to_downgrade() {
        let (store, service, basic, plus) = setup().await;
        let subscriber = Uuid::new_v4();
        store
            .insert_subscription(&active_subscription(subscriber, &plus))
            .await
            .unwrap();

        let result = service
            .initiate_subscription(
                SubscribeRequest {
                    subscriber_id: subscriber,
                    email: "fan@example.com".to_string(),
                    tier_id: basic.id,
                },
                NOW,
            )
            .await
            .unwrap();
        assert!(matches!(result, InitiationResult::DowngradeScheduled { .. }));
    }

    #[tokio::test]
    async fn test_subscription_request_rejections() {
        let (store, service, basic, _) = setup().await;

        let own = service
            .initiate_subscription(
                SubscribeRequest {
                    subscriber_id: basic.creator_id,
                    email: "me@example.com".to_string(),
                    tier_id: basic.id,
                },
                NOW,
            )
            .await;
        assert!(matches!(own, Err(BillingError::Validation(_))));

        let missing = service
            .initiate_subscription(
                SubscribeRequest {
                    subscriber_id: Uuid::new_v4(),
                    email: "fan@example.com".to_string(),
                    tier_id: Uuid::new_v4(),
                },
                NOW,
            )
            .await;
        assert!(matches!(missing, Err(BillingError::NotFound(_))));

        let subscriber = Uuid::new_v4();
        let mut paused = active_subscription(subscriber, &basic);
        paused.status = SubscriptionStatus::Paused;
        store.insert_subscription(&paused).await.unwrap();
        let blocked = service
            .initiate_subscription(
                SubscribeRequest {
                    subscriber_id: subscriber,
                    email: "fan@example.com".to_string(),
                    tier_id: basic.id,
                },
                NOW,
            )
            .await;
        assert!(matches!(blocked, Err(BillingError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_same_tier_request_is_validation_error() {
        let (store, service, basic, _) = setup().await;
        let subscriber = Uuid::new_v4();
        store
            .insert_subscription(&active_subscription(subscriber, &basic))
            .await
            .unwrap();

        let result = service
            .initiate_subscription(
                SubscribeRequest {
                    subscriber_id: subscriber,
                    email: "fan@example.com".to_string(),
                    tier_id: basic.id,
                },
                NOW,
            )
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_ppv_validation() {
        let (_, service, basic, _) = setup().await;
        let mut post = Post {
            id: Uuid::new_v4(),
            creator_id: basic.creator_id,
            visibility: PostVisibility::Subscribers,
            ppv_enabled: false,
            ppv_price: Some(ghs(1500)),
            required_tier_id: None,
        };
        let buyer = Uuid::new_v4();

        let not_ppv = service
            .initiate_ppv(
                PpvRequest {
                    subscriber_id: buyer,
                    email: "fan@example.com".to_string(),
                    post: post.clone(),
                },
                NOW,
            )
            .await;
        assert!(matches!(not_ppv, Err(BillingError::Validation(_))));

        post.ppv_enabled = true;
        let result = service
            .initiate_ppv(
                PpvRequest {
                    subscriber_id: buyer,
                    email: "fan@example.com".to_string(),
                    post: post.clone(),
                },
                NOW,
            )
            .await
            .unwrap();
        match result {
            InitiationResult::PaymentRequired { intent, .. } => {
                assert_eq!(intent.purpose, PaymentPurpose::PpvPurchase);
                assert_eq!(intent.related_post_id, Some(post.id));
                assert_eq!(intent.amount, ghs(1500));
            }
            other => panic!("expected payment, got {:?}", other),
        }
    }
}
