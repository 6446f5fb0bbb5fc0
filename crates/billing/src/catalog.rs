//! Creator tier catalog

use std::sync::Arc;

use fanvault_shared::Money;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::SubscriptionTier;
use crate::store::BillingStore;

/// Input for a new tier
#[derive(Debug, Clone, Deserialize)]
pub struct NewTier {
    pub name: String,
    pub monthly_price: Money,
    pub rank: i32,
}

/// Tier administration for creators
///
/// Price and active-flag edits apply to future charges only. A creator's
/// tiers share one currency so that proration between them is defined.
pub struct TierCatalog {
    store: Arc<dyn BillingStore>,
}

impl TierCatalog {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn get_tier(&self, tier_id: Uuid) -> BillingResult<SubscriptionTier> {
        self.store
            .get_tier(tier_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Tier {} not found", tier_id)))
    }

    pub async fn list_creator_tiers(&self, creator_id: Uuid) -> BillingResult<Vec<SubscriptionTier>> {
        self.store.list_creator_tiers(creator_id).await
    }

    pub async fn create_tier(
        &self,
        creator_id: Uuid,
        new_tier: NewTier,
    ) -> BillingResult<SubscriptionTier> {
        let name = new_tier.name.trim();
        if name.is_empty() {
            return Err(BillingError::Validation("Tier name is required".to_string()));
        }
        validate_price(&new_tier.monthly_price)?;

        let existing = self.store.list_creator_tiers(creator_id).await?;
        if let Some(other) = existing.first() {
            other
                .monthly_price
                .ensure_same_currency(&new_tier.monthly_price)?;
        }

        let tier = SubscriptionTier {
            id: Uuid::new_v4(),
            creator_id,
            name: name.to_string(),
            monthly_price: new_tier.monthly_price,
            rank: new_tier.rank,
            active: true,
        };
        self.store.insert_tier(&tier).await?;

        tracing::info!(
            creator_id = %creator_id,
            tier_id = %tier.id,
            rank = tier.rank,
            price = %tier.monthly_price,
            "Created subscription tier"
        );
        Ok(tier)
    }

    pub async fn update_tier_price(
        &self,
        creator_id: Uuid,
        tier_id: Uuid,
        monthly_price: Money,
    ) -> BillingResult<SubscriptionTier> {
        validate_price(&monthly_price)?;
        let mut tier = self.owned_tier(creator_id, tier_id).await?;
        tier.monthly_price.ensure_same_currency(&monthly_price)?;

        let previous = std::mem::replace(&mut tier.monthly_price, monthly_price);
        self.save(&tier).await?;

        tracing::info!(
            tier_id = %tier_id,
            old_price = %previous,
            new_price = %tier.monthly_price,
            "Updated tier price"
        );
        Ok(tier)
    }

    pub async fn set_tier_active(
        &self,
        creator_id: Uuid,
        tier_id: Uuid,
        active: bool,
    ) -> BillingResult<SubscriptionTier> {
        let mut tier = self.owned_tier(creator_id, tier_id).await?;
        tier.active = active;
        self.save(&tier).await?;

        tracing::info!(tier_id = %tier_id, active, "Changed tier availability");
        Ok(tier)
    }

    /// Remove a tier nobody is subscribed to
    pub async fn delete_tier(&self, creator_id: Uuid, tier_id: Uuid) -> BillingResult<()> {
        self.owned_tier(creator_id, tier_id).await?;
        if !self.store.delete_tier(tier_id).await? {
            return Err(BillingError::NotFound(format!("Tier {} not found", tier_id)));
        }
        tracing::info!(creator_id = %creator_id, tier_id = %tier_id, "Deleted subscription tier");
        Ok(())
    }

    async fn owned_tier(&self, creator_id: Uuid, tier_id: Uuid) -> BillingResult<SubscriptionTier> {
        let tier = self.get_tier(tier_id).await?;
        if tier.creator_id != creator_id {
            tracing::warn!(
                actor = %creator_id,
                tier_id = %tier_id,
                "Rejected tier edit by non-owner"
            );
            return Err(BillingError::Authorization(
                "Tier belongs to another creator".to_string(),
            ));
        }
        Ok(tier)
    }

    async fn save(&self, tier: &SubscriptionTier) -> BillingResult<()> {
        if !self.store.update_tier(tier).await? {
            return Err(BillingError::NotFound(format!("Tier {} not found", tier.id)));
        }
        Ok(())
    }
}

fn validate_price(price: &Money) -> BillingResult<()> {
    if !price.is_positive() {
        return Err(BillingError::Validation(format!(
            "Monthly price must be positive, got {}",
            price
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Subscription, SubscriptionStatus};
    use crate::store::InMemoryStore;
    use fanvault_shared::Currency;
    use time::macros::datetime;

    fn ghs(minor: i64) -> Money {
        Money::new(minor, Currency::new("GHS").unwrap())
    }

    fn new_tier(name: &str, rank: i32, minor: i64) -> NewTier {
        NewTier {
            name: name.to_string(),
            monthly_price: ghs(minor),
            rank,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_in_rank_order() {
        let catalog = TierCatalog::new(Arc::new(InMemoryStore::new()));
        let creator = Uuid::new_v4();

        catalog
            .create_tier(creator, new_tier("VIP", 3, 9000))
            .await
            .unwrap();
        catalog
            .create_tier(creator, new_tier("Basic", 1, 2000))
            .await
            .unwrap();

        let tiers = catalog.list_creator_tiers(creator).await.unwrap();
        let names: Vec<&str> = tiers.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Basic", "VIP"]);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let catalog = TierCatalog::new(Arc::new(InMemoryStore::new()));
        let creator = Uuid::new_v4();

        for bad in [new_tier("Free", 1, 0), new_tier("Neg", 1, -100), new_tier("  ", 1, 100)] {
            assert!(matches!(
                catalog.create_tier(creator, bad).await,
                Err(BillingError::Validation(_))
            ));
        }

        catalog
            .create_tier(creator, new_tier("Basic", 1, 2000))
            .await
            .unwrap();
        assert!(matches!(
            catalog.create_tier(creator, new_tier("Copy", 1, 3000)).await,
            Err(BillingError::Conflict(_))
        ));

        let usd = NewTier {
            name: "Dollar".to_string(),
            monthly_price: Money::new(500, Currency::new("USD").unwrap()),
            rank: 2,
        };
        assert!(matches!(
            catalog.create_tier(creator, usd).await,
            Err(BillingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_only_owner_edits() {
        let catalog = TierCatalog::new(Arc::new(InMemoryStore::new()));
        let creator = Uuid::new_v4();
        let tier = catalog
            .create_tier(creator, new_tier("Basic", 1, 2000))
            .await
            .unwrap();

        let stranger = Uuid::new_v4();
        assert!(matches!(
            catalog.update_tier_price(stranger, tier.id, ghs(2500)).await,
            Err(BillingError::Authorization(_))
        ));

        let updated = catalog
            .update_tier_price(creator, tier.id, ghs(2500))
            .await
            .unwrap();
        assert_eq!(updated.monthly_price, ghs(2500));

        let hidden = catalog.set_tier_active(creator, tier.id, false).await.unwrap();
        assert!(!hidden.active);
        assert!(!catalog.get_tier(tier.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_delete_referenced_tier_conflicts() {
        let store = Arc::new(InMemoryStore::new());
        let catalog = TierCatalog::new(store.clone());
        let creator = Uuid::new_v4();
        let tier = catalog
            .create_tier(creator, new_tier("Basic", 1, 2000))
            .await
            .unwrap();

        store
            .insert_subscription(&Subscription {
                id: Uuid::new_v4(),
                subscriber_id: Uuid::new_v4(),
                creator_id: creator,
                tier_id: tier.id,
                status: SubscriptionStatus::Cancelled,
                billing_anchor_date: datetime!(2025-01-01 00:00 UTC),
                next_billing_date: datetime!(2025-01-31 00:00 UTC),
                auto_renew: false,
                pending_change: None,
                version: 0,
            })
            .await
            .unwrap();

        assert!(matches!(
            catalog.delete_tier(creator, tier.id).await,
            Err(BillingError::Conflict(_))
        ));

        let unused = catalog
            .create_tier(creator, new_tier("Plus", 2, 4000))
            .await
            .unwrap();
        catalog.delete_tier(creator, unused.id).await.unwrap();
        assert!(matches!(
            catalog.get_tier(unused.id).await,
            Err(BillingError::NotFound(_))
        ));
    }
}
