//! Billing Invariants Module
//!
//! Read-only consistency checks over the billing tables. The worker runs them
//! daily and after incidents; any violation means a write path let bad state
//! through and needs a human.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Subscription ids or payment references involved
    pub subjects: Vec<String>,
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Access or money is wrong right now
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Potential issue, should investigate
    Medium,
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    fn from_violations(checked_at: OffsetDateTime, violations: Vec<InvariantViolation>) -> Self {
        let checks_run = CHECKS.len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }
}

const CHECKS: [&str; 6] = [
    "single_active_subscription",
    "billing_dates_ordered",
    "pending_change_only_when_active",
    "pending_change_tier_exists",
    "closed_intent_recorded",
    "ppv_backed_by_settlement",
];

#[derive(Debug, sqlx::FromRow)]
struct DuplicateActiveRow {
    subscriber_id: Uuid,
    creator_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DateOrderRow {
    id: Uuid,
    billing_anchor_date: OffsetDateTime,
    next_billing_date: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct PendingChangeRow {
    id: Uuid,
    status: String,
    pending_target_tier_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct UnrecordedIntentRow {
    reference: String,
    status: String,
    settled_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct UnbackedPpvRow {
    subscriber_id: Uuid,
    post_id: Uuid,
    payment_reference: String,
    intent_status: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();
        for name in CHECKS {
            violations.extend(self.run_check(name).await?);
        }

        let summary = InvariantCheckSummary::from_violations(now, violations);
        if summary.healthy {
            tracing::info!(checks_run = summary.checks_run, "Billing invariants hold");
        } else {
            for violation in &summary.violations {
                tracing::error!(
                    invariant = %violation.invariant,
                    severity = %violation.severity,
                    subjects = ?violation.subjects,
                    "{}",
                    violation.description
                );
            }
        }
        Ok(summary)
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_active_subscription" => self.check_single_active_subscription().await,
            "billing_dates_ordered" => self.check_billing_dates_ordered().await,
            "pending_change_only_when_active" => self.check_pending_change_only_when_active().await,
            "pending_change_tier_exists" => self.check_pending_change_tier_exists().await,
            "closed_intent_recorded" => self.check_closed_intent_recorded().await,
            "ppv_backed_by_settlement" => self.check_ppv_backed_by_settlement().await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        CHECKS.to_vec()
    }

    /// At most one active subscription per (subscriber, creator)
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateActiveRow> = sqlx::query_as(
            r#"
            SELECT subscriber_id, creator_id, COUNT(*) AS sub_count
            FROM subscriptions
            WHERE status = 'active'
            GROUP BY subscriber_id, creator_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                subjects: vec![row.subscriber_id.to_string()],
                description: format!(
                    "Subscriber holds {} active subscriptions to creator {}",
                    row.sub_count, row.creator_id
                ),
                context: serde_json::json!({
                    "creator_id": row.creator_id,
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    async fn check_billing_dates_ordered(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DateOrderRow> = sqlx::query_as(
            r#"
            SELECT id, billing_anchor_date, next_billing_date
            FROM subscriptions
            WHERE next_billing_date < billing_anchor_date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "billing_dates_ordered".to_string(),
                subjects: vec![row.id.to_string()],
                description: "Next billing date precedes the billing anchor".to_string(),
                context: serde_json::json!({
                    "billing_anchor_date": row.billing_anchor_date,
                    "next_billing_date": row.next_billing_date,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Pausing and cancelling clear pending changes
    async fn check_pending_change_only_when_active(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PendingChangeRow> = sqlx::query_as(
            r#"
            SELECT id, status, pending_target_tier_id
            FROM subscriptions
            WHERE status <> 'active'
              AND pending_target_tier_id IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "pending_change_only_when_active".to_string(),
                subjects: vec![row.id.to_string()],
                description: format!("Subscription is {} but still has a pending change", row.status),
                context: serde_json::json!({
                    "status": row.status,
                    "pending_target_tier_id": row.pending_target_tier_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// The sweep drops these, so a hit means the sweep is not running
    async fn check_pending_change_tier_exists(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PendingChangeRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.status, s.pending_target_tier_id
            FROM subscriptions s
            WHERE s.pending_target_tier_id IS NOT NULL
              AND NOT EXISTS (
                  SELECT 1 FROM subscription_tiers t
                  WHERE t.id = s.pending_target_tier_id
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "pending_change_tier_exists".to_string(),
                subjects: vec![row.id.to_string()],
                description: "Pending change targets a tier that no longer exists".to_string(),
                context: serde_json::json!({
                    "pending_target_tier_id": row.pending_target_tier_id,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Every settled or failed intent carries an audit record
    async fn check_closed_intent_recorded(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnrecordedIntentRow> = sqlx::query_as(
            r#"
            SELECT p.reference, p.status, p.settled_at
            FROM payment_intents p
            WHERE p.status IN ('settled', 'failed')
              AND NOT EXISTS (
                  SELECT 1 FROM settlement_log l WHERE l.reference = p.reference
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "closed_intent_recorded".to_string(),
                description: format!("Payment {} is {} without a settlement record", row.reference, row.status),
                subjects: vec![row.reference],
                context: serde_json::json!({
                    "status": row.status,
                    "settled_at": row.settled_at,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// PPV unlocks only come from settled payments
    async fn check_ppv_backed_by_settlement(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnbackedPpvRow> = sqlx::query_as(
            r#"
            SELECT v.subscriber_id, v.post_id, v.payment_reference, p.status AS intent_status
            FROM ppv_purchases v
            JOIN payment_intents p ON p.reference = v.payment_reference
            WHERE p.status <> 'settled'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "ppv_backed_by_settlement".to_string(),
                description: format!(
                    "PPV unlock of post {} rests on a {} payment",
                    row.post_id, row.intent_status
                ),
                subjects: vec![row.subscriber_id.to_string(), row.payment_reference],
                context: serde_json::json!({
                    "post_id": row.post_id,
                    "intent_status": row.intent_status,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"single_active_subscription"));
        assert!(checks.contains(&"closed_intent_recorded"));
    }

    #[test]
    fn test_summary_counts_failed_checks_once() {
        let violation = |invariant: &str| InvariantViolation {
            invariant: invariant.to_string(),
            subjects: vec![],
            description: String::new(),
            context: serde_json::Value::Null,
            severity: ViolationSeverity::High,
        };
        let summary = InvariantCheckSummary::from_violations(
            datetime!(2025-01-01 00:00 UTC),
            vec![
                violation("billing_dates_ordered"),
                violation("billing_dates_ordered"),
                violation("closed_intent_recorded"),
            ],
        );
        assert_eq!(summary.checks_failed, 2);
        assert_eq!(summary.checks_passed, 4);
        assert!(!summary.healthy);

        let clean = InvariantCheckSummary::from_violations(datetime!(2025-01-01 00:00 UTC), vec![]);
        assert!(clean.healthy);
        assert_eq!(clean.checks_passed, 6);
    }
}
