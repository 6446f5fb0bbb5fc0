//! Scheduled reconciliation sweep
//!
//! Expires paused and cancelled subscriptions whose paid period is over and
//! applies downgrades that have come due. Each row is written with a single
//! compare-and-set; a row changed by a live request in the meantime is counted
//! as a conflict and picked up again on the next run.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::config::BillingConfig;
use crate::error::BillingResult;
use crate::lifecycle::{self, Transition};
use crate::models::{Subscription, SubscriptionStatus};
use crate::store::BillingStore;

/// Counts from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub expired: usize,
    pub changes_applied: usize,
    /// Pending changes dropped because their target tier is gone
    pub changes_dropped: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl ReconcileReport {
    fn merge(&mut self, other: ReconcileReport) {
        self.expired += other.expired;
        self.changes_applied += other.changes_applied;
        self.changes_dropped += other.changes_dropped;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
    }
}

enum RowResult {
    Expired,
    ChangeApplied,
    ChangeDropped,
    Conflict,
}

pub struct ReconciliationService {
    store: Arc<dyn BillingStore>,
    config: BillingConfig,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn BillingStore>, config: BillingConfig) -> Self {
        Self { store, config }
    }

    /// Run both passes
    pub async fn run(&self, now: OffsetDateTime) -> BillingResult<ReconcileReport> {
        let mut report = self.expire_due_subscriptions(now).await?;
        report.merge(self.execute_due_pending_changes(now).await?);

        tracing::info!(
            expired = report.expired,
            changes_applied = report.changes_applied,
            changes_dropped = report.changes_dropped,
            conflicts = report.conflicts,
            errors = report.errors,
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    /// Move lapsed paused and cancelled subscriptions to `expired`
    pub async fn expire_due_subscriptions(&self, now: OffsetDateTime) -> BillingResult<ReconcileReport> {
        let due = self.store.list_due_subscriptions(now).await?;
        let mut report = ReconcileReport::default();

        for subscription in due.iter().filter(|s| {
            matches!(
                s.status,
                SubscriptionStatus::Paused | SubscriptionStatus::Cancelled
            )
        }) {
            let result = self.write(subscription, &Transition::Expire, now).await;
            tally(&mut report, subscription, result);
        }
        Ok(report)
    }

    /// Apply scheduled downgrades whose effective date has passed
    pub async fn execute_due_pending_changes(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<ReconcileReport> {
        let due = self.store.list_due_subscriptions(now).await?;
        let mut report = ReconcileReport::default();

        for subscription in due
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active && s.pending_change.is_some())
        {
            let result = self.execute_pending_change(subscription, now).await;
            tally(&mut report, subscription, result);
        }
        Ok(report)
    }

    async fn execute_pending_change(
        &self,
        subscription: &Subscription,
        now: OffsetDateTime,
    ) -> BillingResult<RowResult> {
        let Some(change) = subscription.pending_change.as_ref() else {
            return Ok(RowResult::Conflict);
        };

        let target_exists = self
            .store
            .get_tier(change.target_tier_id)
            .await?
            .is_some_and(|tier| tier.creator_id == subscription.creator_id);

        if !target_exists {
            tracing::error!(
                alert = "creator_configuration",
                subscription_id = %subscription.id,
                target_tier_id = %change.target_tier_id,
                "Pending change targets a missing tier; dropping it"
            );
            return match self
                .write(subscription, &Transition::ClearPendingChange, now)
                .await?
            {
                RowResult::Conflict => Ok(RowResult::Conflict),
                _ => Ok(RowResult::ChangeDropped),
            };
        }

        self.write(
            subscription,
            &Transition::ExecutePendingChange {
                period: self.config.period,
            },
            now,
        )
        .await
    }

    /// One compare-and-set, no retry
    async fn write(
        &self,
        subscription: &Subscription,
        transition: &Transition,
        now: OffsetDateTime,
    ) -> BillingResult<RowResult> {
        let next = lifecycle::apply(subscription, transition, now)?;
        if !self
            .store
            .compare_and_swap_subscription(subscription.version, &next)
            .await?
        {
            return Ok(RowResult::Conflict);
        }

        tracing::info!(
            subscription_id = %subscription.id,
            transition = transition.name(),
            status = %next.status,
            tier_id = %next.tier_id,
            "Reconciled subscription"
        );
        Ok(match transition {
            Transition::Expire => RowResult::Expired,
            _ => RowResult::ChangeApplied,
        })
    }
}

fn tally(report: &mut ReconcileReport, subscription: &Subscription, result: BillingResult<RowResult>) {
    match result {
        Ok(RowResult::Expired) => report.expired += 1,
        Ok(RowResult::ChangeApplied) => report.changes_applied += 1,
        Ok(RowResult::ChangeDropped) => report.changes_dropped += 1,
        Ok(RowResult::Conflict) => {
            tracing::debug!(
                subscription_id = %subscription.id,
                "Subscription changed during sweep; retrying next run"
            );
            report.conflicts += 1;
        }
        Err(e) => {
            tracing::error!(subscription_id = %subscription.id, error = %e, "Failed to reconcile subscription");
            report.errors += 1;
        }
    }
}
