//! Postgres billing store
//!
//! Settlement runs in one transaction: the conditional
//! `UPDATE payment_intents ... WHERE status = 'pending'` is the claim, and its
//! affected-row count decides which concurrent caller applies the side effect.

use async_trait::async_trait;
use fanvault_shared::{Currency, Money};
use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{BillingStore, ClaimOutcome, SettlementPlan};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    ChangeType, PaymentIntent, PaymentPurpose, PaymentStatus, PendingChange, PpvPurchase,
    SettlementOutcome, SettlementRecord, Subscription, SubscriptionStatus, SubscriptionTier,
};

const TIER_SELECT: &str = r#"
    SELECT id, creator_id, name, monthly_price_minor, currency, rank, active
    FROM subscription_tiers
"#;

const SUBSCRIPTION_SELECT: &str = r#"
    SELECT id, subscriber_id, creator_id, tier_id, status, billing_anchor_date,
           next_billing_date, auto_renew, pending_target_tier_id, pending_change_type,
           pending_effective_date, pending_amount_minor, pending_currency, version
    FROM subscriptions
"#;

const INTENT_SELECT: &str = r#"
    SELECT reference, subscriber_id, purpose, amount_minor, currency,
           related_subscription_id, related_post_id, related_tier_id,
           status, created_at, settled_at
    FROM payment_intents
"#;

fn money(minor: i64, currency: &str) -> BillingResult<Money> {
    let currency = Currency::new(currency)
        .map_err(|e| BillingError::Database(format!("Stored currency is invalid: {}", e)))?;
    Ok(Money::new(minor, currency))
}

#[derive(Debug, sqlx::FromRow)]
struct TierRow {
    id: Uuid,
    creator_id: Uuid,
    name: String,
    monthly_price_minor: i64,
    currency: String,
    rank: i32,
    active: bool,
}

impl TryFrom<TierRow> for SubscriptionTier {
    type Error = BillingError;

    fn try_from(row: TierRow) -> BillingResult<Self> {
        Ok(SubscriptionTier {
            id: row.id,
            creator_id: row.creator_id,
            name: row.name,
            monthly_price: money(row.monthly_price_minor, &row.currency)?,
            rank: row.rank,
            active: row.active,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    subscriber_id: Uuid,
    creator_id: Uuid,
    tier_id: Uuid,
    status: String,
    billing_anchor_date: OffsetDateTime,
    next_billing_date: OffsetDateTime,
    auto_renew: bool,
    pending_target_tier_id: Option<Uuid>,
    pending_change_type: Option<String>,
    pending_effective_date: Option<OffsetDateTime>,
    pending_amount_minor: Option<i64>,
    pending_currency: Option<String>,
    version: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> BillingResult<Self> {
        let pending_change = match (
            row.pending_target_tier_id,
            row.pending_change_type,
            row.pending_effective_date,
            row.pending_amount_minor,
            row.pending_currency,
        ) {
            (Some(target_tier_id), Some(kind), Some(date), Some(minor), Some(currency)) => {
                Some(PendingChange {
                    target_tier_id,
                    change_type: ChangeType::parse(&kind)?,
                    scheduled_effective_date: date,
                    proration_credit_or_charge: money(minor, &currency)?,
                })
            }
            (None, None, None, None, None) => None,
            _ => {
                return Err(BillingError::Database(format!(
                    "Subscription {} has a partially written pending change",
                    row.id
                )))
            }
        };

        Ok(Subscription {
            id: row.id,
            subscriber_id: row.subscriber_id,
            creator_id: row.creator_id,
            tier_id: row.tier_id,
            status: SubscriptionStatus::parse(&row.status)?,
            billing_anchor_date: row.billing_anchor_date,
            next_billing_date: row.next_billing_date,
            auto_renew: row.auto_renew,
            pending_change,
            version: row.version,
        })
    }
}

/// Column values for the flattened pending change
struct PendingColumns {
    target_tier_id: Option<Uuid>,
    change_type: Option<&'static str>,
    effective_date: Option<OffsetDateTime>,
    amount_minor: Option<i64>,
    currency: Option<String>,
}

impl From<&Option<PendingChange>> for PendingColumns {
    fn from(pending: &Option<PendingChange>) -> Self {
        match pending {
            Some(p) => PendingColumns {
                target_tier_id: Some(p.target_tier_id),
                change_type: Some(p.change_type.as_str()),
                effective_date: Some(p.scheduled_effective_date),
                amount_minor: Some(p.proration_credit_or_charge.minor),
                currency: Some(p.proration_credit_or_charge.currency.code().to_string()),
            },
            None => PendingColumns {
                target_tier_id: None,
                change_type: None,
                effective_date: None,
                amount_minor: None,
                currency: None,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IntentRow {
    reference: String,
    subscriber_id: Uuid,
    purpose: String,
    amount_minor: i64,
    currency: String,
    related_subscription_id: Option<Uuid>,
    related_post_id: Option<Uuid>,
    related_tier_id: Option<Uuid>,
    status: String,
    created_at: OffsetDateTime,
    settled_at: Option<OffsetDateTime>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = BillingError;

    fn try_from(row: IntentRow) -> BillingResult<Self> {
        Ok(PaymentIntent {
            amount: money(row.amount_minor, &row.currency)?,
            reference: row.reference,
            subscriber_id: row.subscriber_id,
            purpose: PaymentPurpose::parse(&row.purpose)?,
            related_subscription_id: row.related_subscription_id,
            related_post_id: row.related_post_id,
            related_tier_id: row.related_tier_id,
            status: PaymentStatus::parse(&row.status)?,
            created_at: row.created_at,
            settled_at: row.settled_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PpvRow {
    subscriber_id: Uuid,
    post_id: Uuid,
    amount_minor: i64,
    currency: String,
    settled_at: OffsetDateTime,
    payment_reference: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SettlementLogRow {
    id: Uuid,
    reference: String,
    outcome: Json<SettlementOutcome>,
    detail: serde_json::Value,
    recorded_at: OffsetDateTime,
}

/// sqlx-backed [`BillingStore`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn intent_exists(&self, reference: &str) -> BillingResult<bool> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM payment_intents WHERE reference = $1)")
                .bind(reference)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists.0)
    }

    async fn fetch_subscriptions(
        &self,
        sql: &str,
        subscriber_id: Uuid,
        creator_id: Uuid,
        now: Option<OffsetDateTime>,
    ) -> BillingResult<Vec<Subscription>> {
        let mut query = sqlx::query_as::<_, SubscriptionRow>(sql)
            .bind(subscriber_id)
            .bind(creator_id);
        if let Some(now) = now {
            query = query.bind(now);
        }
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Subscription::try_from)
            .collect()
    }
}

#[async_trait]
impl BillingStore for PgStore {
    async fn insert_tier(&self, tier: &SubscriptionTier) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_tiers
                (id, creator_id, name, monthly_price_minor, currency, rank, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tier.id)
        .bind(tier.creator_id)
        .bind(&tier.name)
        .bind(tier.monthly_price.minor)
        .bind(tier.monthly_price.currency.code())
        .bind(tier.rank)
        .bind(tier.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tier(&self, id: Uuid) -> BillingResult<Option<SubscriptionTier>> {
        let sql = format!("{} WHERE id = $1", TIER_SELECT);
        sqlx::query_as::<_, TierRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(SubscriptionTier::try_from)
            .transpose()
    }

    async fn list_creator_tiers(&self, creator_id: Uuid) -> BillingResult<Vec<SubscriptionTier>> {
        let sql = format!("{} WHERE creator_id = $1 ORDER BY rank ASC", TIER_SELECT);
        sqlx::query_as::<_, TierRow>(&sql)
            .bind(creator_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(SubscriptionTier::try_from)
            .collect()
    }

    async fn update_tier(&self, tier: &SubscriptionTier) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_tiers
            SET name = $2, monthly_price_minor = $3, currency = $4, active = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(tier.id)
        .bind(&tier.name)
        .bind(tier.monthly_price.minor)
        .bind(tier.monthly_price.currency.code())
        .bind(tier.active)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_tier(&self, id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM subscription_tiers
            WHERE id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions
                  WHERE status <> 'expired'
                    AND (tier_id = $1 OR pending_target_tier_id = $1)
              )
              AND NOT EXISTS (
                  SELECT 1 FROM payment_intents
                  WHERE status = 'pending' AND related_tier_id = $1
              )
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.get_tier(id).await?.is_some() {
            return Err(BillingError::Conflict(format!(
                "Tier {} is still referenced by a subscription or payment",
                id
            )));
        }
        Ok(false)
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let sql = format!("{} WHERE id = $1", SUBSCRIPTION_SELECT);
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn find_live_subscription(
        &self,
        subscriber_id: Uuid,
        creator_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        let sql = format!(
            "{} WHERE subscriber_id = $1 AND creator_id = $2 \
             AND status IN ('active', 'paused') \
             ORDER BY (status = 'active') DESC LIMIT 1",
            SUBSCRIPTION_SELECT
        );
        Ok(self
            .fetch_subscriptions(&sql, subscriber_id, creator_id, None)
            .await?
            .into_iter()
            .next())
    }

    async fn list_entitling_subscriptions(
        &self,
        subscriber_id: Uuid,
        creator_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>> {
        let sql = format!(
            "{} WHERE subscriber_id = $1 AND creator_id = $2 \
             AND (status = 'active' \
                  OR (status IN ('paused', 'cancelled') AND next_billing_date > $3))",
            SUBSCRIPTION_SELECT
        );
        self.fetch_subscriptions(&sql, subscriber_id, creator_id, Some(now))
            .await
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        let pending = PendingColumns::from(&subscription.pending_change);
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, subscriber_id, creator_id, tier_id, status, billing_anchor_date,
                 next_billing_date, auto_renew, pending_target_tier_id, pending_change_type,
                 pending_effective_date, pending_amount_minor, pending_currency, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.subscriber_id)
        .bind(subscription.creator_id)
        .bind(subscription.tier_id)
        .bind(subscription.status.as_str())
        .bind(subscription.billing_anchor_date)
        .bind(subscription.next_billing_date)
        .bind(subscription.auto_renew)
        .bind(pending.target_tier_id)
        .bind(pending.change_type)
        .bind(pending.effective_date)
        .bind(pending.amount_minor)
        .bind(pending.currency)
        .bind(subscription.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn compare_and_swap_subscription(
        &self,
        expected_version: i64,
        updated: &Subscription,
    ) -> BillingResult<bool> {
        let pending = PendingColumns::from(&updated.pending_change);
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET tier_id = $3,
                status = $4,
                billing_anchor_date = $5,
                next_billing_date = $6,
                auto_renew = $7,
                pending_target_tier_id = $8,
                pending_change_type = $9,
                pending_effective_date = $10,
                pending_amount_minor = $11,
                pending_currency = $12,
                version = $13,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(updated.id)
        .bind(expected_version)
        .bind(updated.tier_id)
        .bind(updated.status.as_str())
        .bind(updated.billing_anchor_date)
        .bind(updated.next_billing_date)
        .bind(updated.auto_renew)
        .bind(pending.target_tier_id)
        .bind(pending.change_type)
        .bind(pending.effective_date)
        .bind(pending.amount_minor)
        .bind(pending.currency)
        .bind(updated.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_due_subscriptions(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        let sql = format!(
            "{} WHERE (status IN ('paused', 'cancelled') AND next_billing_date <= $1) \
             OR (status = 'active' AND pending_effective_date <= $1) \
             ORDER BY next_billing_date ASC",
            SUBSCRIPTION_SELECT
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Subscription::try_from)
            .collect()
    }

    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_intents
                (reference, subscriber_id, purpose, amount_minor, currency,
                 related_subscription_id, related_post_id, related_tier_id,
                 status, created_at, settled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&intent.reference)
        .bind(intent.subscriber_id)
        .bind(intent.purpose.as_str())
        .bind(intent.amount.minor)
        .bind(intent.amount.currency.code())
        .bind(intent.related_subscription_id)
        .bind(intent.related_post_id)
        .bind(intent.related_tier_id)
        .bind(intent.status.as_str())
        .bind(intent.created_at)
        .bind(intent.settled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_payment_intent(&self, reference: &str) -> BillingResult<Option<PaymentIntent>> {
        let sql = format!("{} WHERE reference = $1", INTENT_SELECT);
        sqlx::query_as::<_, IntentRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?
            .map(PaymentIntent::try_from)
            .transpose()
    }

    async fn fail_payment_intent(
        &self,
        reference: &str,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE payment_intents SET status = 'failed' WHERE reference = $1 AND status = 'pending'",
        )
        .bind(reference)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            if !self.intent_exists(reference).await? {
                return Err(BillingError::unknown_reference(reference));
            }
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO settlement_log (id, reference, outcome, detail, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reference)
        .bind(Json(SettlementOutcome::PaymentFailed))
        .bind(detail)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn claim_and_apply(
        &self,
        reference: &str,
        plan: SettlementPlan,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> BillingResult<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;

        // The claim: concurrent callers serialize on the row lock and only
        // the first sees status = 'pending'
        let claimed = sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'settled', settled_at = $2
            WHERE reference = $1 AND status = 'pending'
            "#,
        )
        .bind(reference)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            if !self.intent_exists(reference).await? {
                return Err(BillingError::unknown_reference(reference));
            }
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let outcome = match plan {
            SettlementPlan::ActivateSubscription(subscription) => {
                // Paused rows count as live; the lock pins them until commit
                let live: Option<(Uuid,)> = sqlx::query_as(
                    r#"
                    SELECT id FROM subscriptions
                    WHERE subscriber_id = $1 AND creator_id = $2
                      AND status IN ('active', 'paused')
                    ORDER BY (status = 'active') DESC
                    LIMIT 1
                    FOR UPDATE
                    "#,
                )
                .bind(subscription.subscriber_id)
                .bind(subscription.creator_id)
                .fetch_optional(&mut *tx)
                .await?;

                if let Some((existing_subscription_id,)) = live {
                    SettlementOutcome::DuplicateSubscription {
                        existing_subscription_id,
                    }
                } else {
                    let inserted: Option<(Uuid,)> = sqlx::query_as(
                        r#"
                        INSERT INTO subscriptions
                            (id, subscriber_id, creator_id, tier_id, status, billing_anchor_date,
                             next_billing_date, auto_renew, version)
                        VALUES ($1, $2, $3, $4, 'active', $5, $6, $7, $8)
                        ON CONFLICT (subscriber_id, creator_id) WHERE status = 'active' DO NOTHING
                        RETURNING id
                        "#,
                    )
                    .bind(subscription.id)
                    .bind(subscription.subscriber_id)
                    .bind(subscription.creator_id)
                    .bind(subscription.tier_id)
                    .bind(subscription.billing_anchor_date)
                    .bind(subscription.next_billing_date)
                    .bind(subscription.auto_renew)
                    .bind(subscription.version)
                    .fetch_optional(&mut *tx)
                    .await?;

                    match inserted {
                        Some(_) => SettlementOutcome::SubscriptionActivated {
                            subscription_id: subscription.id,
                            tier_id: subscription.tier_id,
                        },
                        None => {
                            let existing: (Uuid,) = sqlx::query_as(
                                r#"
                                SELECT id FROM subscriptions
                                WHERE subscriber_id = $1 AND creator_id = $2 AND status = 'active'
                                "#,
                            )
                            .bind(subscription.subscriber_id)
                            .bind(subscription.creator_id)
                            .fetch_one(&mut *tx)
                            .await?;
                            SettlementOutcome::DuplicateSubscription {
                                existing_subscription_id: existing.0,
                            }
                        }
                    }
                }
            }

            SettlementPlan::UpgradeTier {
                subscription_id,
                tier_id,
            } => {
                let updated = sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET tier_id = $2,
                        pending_target_tier_id = NULL,
                        pending_change_type = NULL,
                        pending_effective_date = NULL,
                        pending_amount_minor = NULL,
                        pending_currency = NULL,
                        version = version + 1,
                        updated_at = NOW()
                    WHERE id = $1
                      AND status = 'active'
                      AND (SELECT rank FROM subscription_tiers WHERE id = subscriptions.tier_id)
                        < (SELECT rank FROM subscription_tiers WHERE id = $2)
                    "#,
                )
                .bind(subscription_id)
                .bind(tier_id)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() > 0 {
                    SettlementOutcome::TierUpgraded {
                        subscription_id,
                        tier_id,
                    }
                } else {
                    SettlementOutcome::UpgradeNotApplied { subscription_id }
                }
            }

            SettlementPlan::UnlockPost(purchase) => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO ppv_purchases
                        (subscriber_id, post_id, amount_minor, currency, settled_at, payment_reference)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (subscriber_id, post_id) DO NOTHING
                    "#,
                )
                .bind(purchase.subscriber_id)
                .bind(purchase.post_id)
                .bind(purchase.amount.minor)
                .bind(purchase.amount.currency.code())
                .bind(purchase.settled_at)
                .bind(&purchase.payment_reference)
                .execute(&mut *tx)
                .await?;

                if inserted.rows_affected() > 0 {
                    SettlementOutcome::PpvUnlocked {
                        post_id: purchase.post_id,
                    }
                } else {
                    SettlementOutcome::AlreadyGranted {
                        post_id: purchase.post_id,
                    }
                }
            }
        };

        sqlx::query(
            r#"
            INSERT INTO settlement_log (id, reference, outcome, detail, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reference)
        .bind(Json(&outcome))
        .bind(detail)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ClaimOutcome::Applied(outcome))
    }

    async fn get_ppv_purchase(
        &self,
        subscriber_id: Uuid,
        post_id: Uuid,
    ) -> BillingResult<Option<PpvPurchase>> {
        let row: Option<PpvRow> = sqlx::query_as(
            r#"
            SELECT subscriber_id, post_id, amount_minor, currency, settled_at, payment_reference
            FROM ppv_purchases
            WHERE subscriber_id = $1 AND post_id = $2
            "#,
        )
        .bind(subscriber_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> BillingResult<PpvPurchase> {
            Ok(PpvPurchase {
                amount: money(r.amount_minor, &r.currency)?,
                subscriber_id: r.subscriber_id,
                post_id: r.post_id,
                settled_at: r.settled_at,
                payment_reference: r.payment_reference,
            })
        })
        .transpose()
    }

    async fn settlement_records(&self, reference: &str) -> BillingResult<Vec<SettlementRecord>> {
        let rows: Vec<SettlementLogRow> = sqlx::query_as(
            r#"
            SELECT id, reference, outcome, detail, recorded_at
            FROM settlement_log
            WHERE reference = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SettlementRecord {
                id: r.id,
                reference: r.reference,
                outcome: r.outcome.0,
                detail: r.detail,
                recorded_at: r.recorded_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn row() -> SubscriptionRow {
        SubscriptionRow {
            id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            status: "active".to_string(),
            billing_anchor_date: datetime!(2025-01-01 00:00 UTC),
            next_billing_date: datetime!(2025-01-31 00:00 UTC),
            auto_renew: true,
            pending_target_tier_id: None,
            pending_change_type: None,
            pending_effective_date: None,
            pending_amount_minor: None,
            pending_currency: None,
            version: 7,
        }
    }

    #[test]
    fn test_subscription_row_without_pending_change() {
        let sub = Subscription::try_from(row()).unwrap();
        assert!(sub.pending_change.is_none());
        assert_eq!(sub.version, 7);
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_subscription_row_with_pending_change() {
        let target = Uuid::new_v4();
        let mut r = row();
        r.pending_target_tier_id = Some(target);
        r.pending_change_type = Some("downgrade".to_string());
        r.pending_effective_date = Some(datetime!(2025-01-31 00:00 UTC));
        r.pending_amount_minor = Some(700);
        r.pending_currency = Some("GHS".to_string());

        let sub = Subscription::try_from(r).unwrap();
        let pending = sub.pending_change.unwrap();
        assert_eq!(pending.target_tier_id, target);
        assert_eq!(pending.change_type, ChangeType::Downgrade);
        assert_eq!(pending.proration_credit_or_charge.minor, 700);
    }

    #[test]
    fn test_partial_pending_change_is_rejected() {
        let mut r = row();
        r.pending_target_tier_id = Some(Uuid::new_v4());
        assert!(matches!(
            Subscription::try_from(r),
            Err(BillingError::Database(_))
        ));
    }

    #[test]
    fn test_no_pending_change_writes_nulls() {
        let cols = PendingColumns::from(&None);
        assert!(cols.target_tier_id.is_none() && cols.change_type.is_none());
        assert!(cols.effective_date.is_none() && cols.amount_minor.is_none());
        assert!(cols.currency.is_none());
    }
}
