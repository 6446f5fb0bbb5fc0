//! Content access resolution
//!
//! Answers "may this user see this post right now". Only settled state is
//! consulted: PPV purchases and entitling subscriptions. Pending payment
//! intents never influence a decision.

use std::sync::Arc;

use fanvault_shared::Money;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{Post, PostVisibility, SubscriptionTier, TierSummary};
use crate::store::BillingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantReason {
    Owner,
    Public,
    PpvPurchase,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    /// Unlock by paying for the post
    PurchaseRequired { price_hint: Option<Money> },
    /// Subscribe to the creator
    SubscriptionRequired,
    /// Subscribed, but below the post's minimum tier
    HigherTierRequired { required_tier: TierSummary },
    /// The creator's tier setup does not resolve; nobody but the owner gets in
    Misconfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Granted { reason: GrantReason },
    Denied { reason: DenialReason },
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted { .. })
    }

    fn granted(reason: GrantReason) -> Self {
        Decision::Granted { reason }
    }

    fn denied(reason: DenialReason) -> Self {
        Decision::Denied { reason }
    }
}

pub struct AccessResolver {
    store: Arc<dyn BillingStore>,
}

impl AccessResolver {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Resolve access for `user_id` (anonymous when `None`).
    ///
    /// Rules are checked in order and the first match wins: owner, public
    /// non-PPV, PPV purchase, PPV without a subscription path, no entitling
    /// subscription, then tier rank.
    pub async fn resolve(
        &self,
        user_id: Option<Uuid>,
        post: &Post,
        now: OffsetDateTime,
    ) -> BillingResult<Decision> {
        let Some(user_id) = user_id else {
            return Ok(match (post.visibility, post.ppv_enabled) {
                (PostVisibility::Public, false) => Decision::granted(GrantReason::Public),
                (_, true) => purchase_required(post),
                (PostVisibility::Subscribers, false) => {
                    Decision::denied(DenialReason::SubscriptionRequired)
                }
            });
        };

        if post.creator_id == user_id {
            return Ok(Decision::granted(GrantReason::Owner));
        }

        if post.visibility == PostVisibility::Public && !post.ppv_enabled {
            return Ok(Decision::granted(GrantReason::Public));
        }

        if post.ppv_enabled {
            if self
                .store
                .get_ppv_purchase(user_id, post.id)
                .await?
                .is_some()
            {
                return Ok(Decision::granted(GrantReason::PpvPurchase));
            }
            // Public PPV posts have no subscription path
            if post.visibility == PostVisibility::Public {
                return Ok(purchase_required(post));
            }
        }

        let best_rank = self.best_entitled_rank(user_id, post.creator_id, now).await?;

        let Some(rank) = best_rank else {
            return Ok(if post.ppv_enabled {
                purchase_required(post)
            } else {
                Decision::denied(DenialReason::SubscriptionRequired)
            });
        };

        let Some(required) = self.required_tier(post).await? else {
            tracing::error!(
                alert = "creator_configuration",
                creator_id = %post.creator_id,
                post_id = %post.id,
                required_tier_id = ?post.required_tier_id,
                "Post's required tier does not resolve; denying access"
            );
            return Ok(if post.ppv_enabled {
                purchase_required(post)
            } else {
                Decision::denied(DenialReason::Misconfigured)
            });
        };

        if rank >= required.rank {
            return Ok(Decision::granted(GrantReason::Subscription));
        }

        Ok(if post.ppv_enabled {
            purchase_required(post)
        } else {
            Decision::denied(DenialReason::HigherTierRequired {
                required_tier: TierSummary::from(&required),
            })
        })
    }

    /// Highest tier rank among the user's entitling subscriptions to `creator_id`
    async fn best_entitled_rank(
        &self,
        user_id: Uuid,
        creator_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Option<i32>> {
        let subscriptions = self
            .store
            .list_entitling_subscriptions(user_id, creator_id, now)
            .await?;

        let mut best: Option<i32> = None;
        for subscription in subscriptions {
            match self.store.get_tier(subscription.tier_id).await? {
                Some(tier) => best = Some(best.map_or(tier.rank, |r| r.max(tier.rank))),
                None => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        tier_id = %subscription.tier_id,
                        "Entitling subscription points at a missing tier"
                    );
                }
            }
        }
        Ok(best)
    }

    /// The post's configured tier, or the creator's lowest-rank tier
    async fn required_tier(&self, post: &Post) -> BillingResult<Option<SubscriptionTier>> {
        match post.required_tier_id {
            Some(tier_id) => Ok(self
                .store
                .get_tier(tier_id)
                .await?
                .filter(|tier| tier.creator_id == post.creator_id)),
            None => Ok(self
                .store
                .list_creator_tiers(post.creator_id)
                .await?
                .into_iter()
                .min_by_key(|tier| tier.rank)),
        }
    }
}

fn purchase_required(post: &Post) -> Decision {
    Decision::denied(DenialReason::PurchaseRequired {
        price_hint: post.ppv_price.clone(),
    })
}
