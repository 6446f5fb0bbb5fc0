//! Payment settlement
//!
//! Turns a gateway confirmation into access exactly once per reference. The
//! same confirmation may arrive through the webhook and the client poll at the
//! same moment; the store's atomic claim picks one winner and every other
//! caller gets the winner's recorded result back.

use std::sync::Arc;

use fanvault_shared::Money;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::{ChargeStatus, PaymentGateway};
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    PaymentIntent, PaymentPurpose, PaymentStatus, PpvPurchase, SettlementOutcome,
    SettlementRecord, Subscription, SubscriptionStatus,
};
use crate::store::{BillingStore, ClaimOutcome, SettlementPlan};

/// What the gateway says about a charge
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayReport {
    pub status: ChargeStatus,
    pub amount: Money,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Result of a settlement attempt; identical for the first call and replays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementResult {
    pub reference: String,
    pub status: PaymentStatus,
    pub outcome: SettlementOutcome,
}

pub struct SettlementProcessor {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: BillingConfig,
}

impl SettlementProcessor {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Settle a confirmed charge.
    ///
    /// Unknown references are `NotFound`; nothing is ever created from
    /// gateway metadata alone. A short or foreign-currency payment is a
    /// `Gateway` error and leaves the intent pending.
    pub async fn settle(
        &self,
        reference: &str,
        report: GatewayReport,
        now: OffsetDateTime,
    ) -> BillingResult<SettlementResult> {
        let intent = self.load_intent(reference).await?;

        if intent.status != PaymentStatus::Pending {
            if intent.status == PaymentStatus::Failed && report.status == ChargeStatus::Success {
                tracing::warn!(
                    reference = %reference,
                    "Success reported for a failed payment; needs manual review"
                );
            }
            return self.replay(&intent).await;
        }

        match report.status {
            ChargeStatus::Success => {}
            ChargeStatus::Failed => {
                return self
                    .fail(&intent, serde_json::json!({ "metadata": report.metadata }), now)
                    .await;
            }
            ChargeStatus::Pending | ChargeStatus::Abandoned => {
                tracing::debug!(
                    reference = %reference,
                    gateway_status = ?report.status,
                    "Charge not completed yet"
                );
                return Ok(SettlementResult {
                    reference: intent.reference,
                    status: PaymentStatus::Pending,
                    outcome: SettlementOutcome::AwaitingPayment,
                });
            }
        }

        if report.amount.currency != intent.amount.currency
            || report.amount.minor < intent.amount.minor
        {
            tracing::error!(
                reference = %reference,
                expected = %intent.amount,
                received = %report.amount,
                "Gateway amount does not cover the payment intent"
            );
            return Err(BillingError::Gateway(format!(
                "Paid {} but {} was due",
                report.amount, intent.amount
            )));
        }

        let plan = self.plan(&intent, now).await?;
        let detail = serde_json::json!({
            "gateway_amount": report.amount,
            "metadata": report.metadata,
        });

        match self
            .store
            .claim_and_apply(reference, plan, detail, now)
            .await?
        {
            ClaimOutcome::Applied(outcome) => {
                if outcome.requires_refund_review() {
                    tracing::warn!(
                        reference = %reference,
                        subscriber_id = %intent.subscriber_id,
                        outcome = ?outcome,
                        "Payment settled without granting anything new; flagged for refund"
                    );
                } else {
                    tracing::info!(
                        reference = %reference,
                        subscriber_id = %intent.subscriber_id,
                        purpose = intent.purpose.as_str(),
                        outcome = ?outcome,
                        "Settled payment"
                    );
                }
                Ok(SettlementResult {
                    reference: intent.reference,
                    status: PaymentStatus::Settled,
                    outcome,
                })
            }
            ClaimOutcome::AlreadyClaimed => {
                tracing::debug!(reference = %reference, "Settlement already claimed by a concurrent call");
                let current = self.load_intent(reference).await?;
                self.replay(&current).await
            }
        }
    }

    /// Record a failed charge; settled intents are left alone
    pub async fn record_failure(
        &self,
        reference: &str,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> BillingResult<SettlementResult> {
        let intent = self.load_intent(reference).await?;
        if intent.status != PaymentStatus::Pending {
            return self.replay(&intent).await;
        }
        self.fail(&intent, detail, now).await
    }

    /// Client poll after the gateway redirect: verify with the gateway, then
    /// settle through the same path as the webhook.
    pub async fn verify_and_settle(
        &self,
        reference: &str,
        requester: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<SettlementResult> {
        let intent = self.load_intent(reference).await?;
        if intent.subscriber_id != requester {
            tracing::warn!(
                reference = %reference,
                requester = %requester,
                "Rejected verification of another subscriber's payment"
            );
            return Err(BillingError::Authorization(
                "Payment belongs to another subscriber".to_string(),
            ));
        }
        if intent.status != PaymentStatus::Pending {
            return self.replay(&intent).await;
        }

        let verified = self.gateway.verify_charge(reference).await?;
        if verified.reference != reference {
            return Err(BillingError::Gateway(format!(
                "Verification for {} returned reference {}",
                reference, verified.reference
            )));
        }

        self.settle(
            reference,
            GatewayReport {
                status: verified.status,
                amount: verified.amount,
                metadata: verified.metadata,
            },
            now,
        )
        .await
    }

    /// Audit trail of a payment, oldest first
    pub async fn settlement_history(&self, reference: &str) -> BillingResult<Vec<SettlementRecord>> {
        self.load_intent(reference).await?;
        self.store.settlement_records(reference).await
    }

    async fn load_intent(&self, reference: &str) -> BillingResult<PaymentIntent> {
        self.store
            .get_payment_intent(reference)
            .await?
            .ok_or_else(|| {
                tracing::warn!(reference = %reference, "Settlement for unknown reference");
                BillingError::unknown_reference(reference)
            })
    }

    async fn fail(
        &self,
        intent: &PaymentIntent,
        detail: serde_json::Value,
        now: OffsetDateTime,
    ) -> BillingResult<SettlementResult> {
        if self
            .store
            .fail_payment_intent(&intent.reference, detail, now)
            .await?
        {
            tracing::info!(
                reference = %intent.reference,
                subscriber_id = %intent.subscriber_id,
                "Payment failed"
            );
            return Ok(SettlementResult {
                reference: intent.reference.clone(),
                status: PaymentStatus::Failed,
                outcome: SettlementOutcome::PaymentFailed,
            });
        }
        let current = self.load_intent(&intent.reference).await?;
        self.replay(&current).await
    }

    /// The result stored by whichever call moved the intent out of `pending`
    async fn replay(&self, intent: &PaymentIntent) -> BillingResult<SettlementResult> {
        if intent.status == PaymentStatus::Pending {
            return Ok(SettlementResult {
                reference: intent.reference.clone(),
                status: PaymentStatus::Pending,
                outcome: SettlementOutcome::AwaitingPayment,
            });
        }

        let record = self
            .store
            .settlement_records(&intent.reference)
            .await?
            .pop()
            .ok_or_else(|| {
                tracing::error!(
                    reference = %intent.reference,
                    status = intent.status.as_str(),
                    "Closed payment intent has no settlement record"
                );
                BillingError::Database(format!(
                    "Payment {} has no settlement record",
                    intent.reference
                ))
            })?;

        Ok(SettlementResult {
            reference: intent.reference.clone(),
            status: intent.status,
            outcome: record.outcome,
        })
    }

    /// Side effect the intent's purpose calls for
    async fn plan(&self, intent: &PaymentIntent, now: OffsetDateTime) -> BillingResult<SettlementPlan> {
        match intent.purpose {
            PaymentPurpose::NewSubscription => {
                let tier_id = intent.require_tier_id()?;
                let tier = self.store.get_tier(tier_id).await?.ok_or_else(|| {
                    BillingError::Database(format!(
                        "Tier {} of payment {} no longer exists",
                        tier_id, intent.reference
                    ))
                })?;
                Ok(SettlementPlan::ActivateSubscription(Subscription {
                    id: intent.require_subscription_id()?,
                    subscriber_id: intent.subscriber_id,
                    creator_id: tier.creator_id,
                    tier_id,
                    status: SubscriptionStatus::Active,
                    billing_anchor_date: now,
                    next_billing_date: self.config.period.advance(now),
                    auto_renew: true,
                    pending_change: None,
                    version: 0,
                }))
            }
            PaymentPurpose::TierUpgrade => Ok(SettlementPlan::UpgradeTier {
                subscription_id: intent.require_subscription_id()?,
                tier_id: intent.require_tier_id()?,
            }),
            PaymentPurpose::PpvPurchase => Ok(SettlementPlan::UnlockPost(PpvPurchase {
                subscriber_id: intent.subscriber_id,
                post_id: intent.require_post_id()?,
                amount: intent.amount.clone(),
                settled_at: now,
                payment_reference: intent.reference.clone(),
            })),
        }
    }
}
