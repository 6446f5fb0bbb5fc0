// Worker clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Fanvault Background Worker
//!
//! Handles scheduled jobs including:
//! - Reconciliation sweep: expire lapsed subscriptions and apply due
//!   downgrades (hourly by default)
//! - Billing invariant checks (daily at 3:30 AM UTC by default)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;

use fanvault_billing::{BillingService, InvariantChecker, ReconcileReport};
use fanvault_shared::create_pool;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const DEFAULT_RECONCILE_CRON: &str = "0 0 * * * *";
const DEFAULT_INVARIANT_CRON: &str = "0 30 3 * * *";

/// Cron expression from the environment, or the default when unset or blank
fn cron_from_env(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn log_reconcile_report(report: &ReconcileReport) {
    if report.errors > 0 || report.changes_dropped > 0 {
        warn!(
            expired = report.expired,
            changes_applied = report.changes_applied,
            changes_dropped = report.changes_dropped,
            conflicts = report.conflicts,
            errors = report.errors,
            "Reconciliation finished with rows needing attention"
        );
    } else {
        info!(
            expired = report.expired,
            changes_applied = report.changes_applied,
            conflicts = report.conflicts,
            "Reconciliation cycle complete"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Fanvault Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    info!("Database pool created");

    let billing = Arc::new(BillingService::from_env(pool.clone())?);
    let checker = Arc::new(InvariantChecker::new(pool));

    let mut scheduler = JobScheduler::new().await?;

    // Job 1: Reconciliation sweep
    let reconcile_cron = cron_from_env("RECONCILE_CRON", DEFAULT_RECONCILE_CRON);
    let reconcile_billing = billing.clone();
    scheduler
        .add(Job::new_async(reconcile_cron.as_str(), move |_uuid, _l| {
            let billing = reconcile_billing.clone();
            Box::pin(async move {
                info!("Running scheduled reconciliation sweep");
                match billing.reconcile.run(OffsetDateTime::now_utc()).await {
                    Ok(report) => log_reconcile_report(&report),
                    Err(e) => error!(error = %e, "Reconciliation sweep failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %reconcile_cron, "Scheduled: Reconciliation sweep");

    // Job 2: Invariant checks
    let invariant_cron = cron_from_env("INVARIANT_CHECK_CRON", DEFAULT_INVARIANT_CRON);
    let invariant_checker = checker.clone();
    scheduler
        .add(Job::new_async(invariant_cron.as_str(), move |_uuid, _l| {
            let checker = invariant_checker.clone();
            Box::pin(async move {
                info!("Running scheduled billing invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) if !summary.healthy => warn!(
                        checks_failed = summary.checks_failed,
                        violations = summary.violations.len(),
                        "Billing invariant violations found"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Invariant check run failed"),
                }
            })
        })?)
        .await?;
    info!(cron = %invariant_cron, "Scheduled: Billing invariant checks");

    // Job 3: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    // Catch up on anything that fell due while the worker was down
    match billing.reconcile.run(OffsetDateTime::now_utc()).await {
        Ok(report) => log_reconcile_report(&report),
        Err(e) => error!(error = %e, "Startup reconciliation sweep failed"),
    }

    info!("Starting job scheduler");
    scheduler.start().await?;
    info!("Fanvault Worker started successfully with {} scheduled jobs", 3);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    scheduler.shutdown().await?;
    info!("Worker stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_from_env_falls_back_to_default() {
        assert_eq!(
            cron_from_env("FANVAULT_TEST_UNSET_CRON", DEFAULT_RECONCILE_CRON),
            DEFAULT_RECONCILE_CRON
        );
    }

    #[tokio::test]
    async fn test_default_crons_parse() {
        for cron in [DEFAULT_RECONCILE_CRON, DEFAULT_INVARIANT_CRON] {
            assert!(Job::new_async(cron, |_uuid, _l| Box::pin(async {})).is_ok());
        }
    }
}
