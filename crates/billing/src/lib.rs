// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError::Http carries a reqwest::Error
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Fanvault Billing Module
//!
//! Entitlement and billing core for creator subscriptions and pay-per-view.
//!
//! ## Features
//!
//! - **Tier Catalog**: Ranked subscription tiers per creator
//! - **Subscriptions**: Pause, resume, cancel, upgrade now, downgrade at period end
//! - **Proration**: Day-based credit and charge for mid-period tier changes
//! - **Checkout**: Payment intents and hosted gateway charges
//! - **Settlement**: Exactly-once application of confirmed payments
//! - **Webhooks**: Signed gateway deliveries feeding settlement
//! - **Access**: Per-post access decisions from settled state only
//! - **Reconciliation**: Scheduled expiry and pending-change sweep
//! - **Invariants**: Read-only consistency checks over the billing tables

pub mod access;
pub mod catalog;
pub mod checkout;
pub mod client;
pub mod config;
pub mod error;
pub mod invariants;
pub mod lifecycle;
pub mod models;
pub mod proration;
pub mod reconcile;
pub mod settlement;
pub mod store;
pub mod subscriptions;
pub mod webhooks;


use std::sync::Arc;

// Access
pub use access::{AccessResolver, Decision, DenialReason, GrantReason};

// Catalog
pub use catalog::{NewTier, TierCatalog};

// Checkout
pub use checkout::{CheckoutService, InitiationResult, PpvRequest, SubscribeRequest};

// Client
pub use client::{
    ChargeRequest, ChargeSession, ChargeStatus, GatewayClient, GatewayConfig, PaymentGateway,
    VerifiedCharge,
};

// Config
pub use config::BillingConfig;

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Models
pub use models::{
    ChangeType, PaymentIntent, PaymentPurpose, PaymentStatus, PendingChange, Post,
    PostVisibility, PpvPurchase, SettlementOutcome, SettlementRecord, Subscription,
    SubscriptionStatus, SubscriptionTier, TierSummary,
};

// Proration
pub use proration::{prorate, Proration};

// Reconciliation
pub use reconcile::{ReconcileReport, ReconciliationService};

// Settlement
pub use settlement::{GatewayReport, SettlementProcessor, SettlementResult};

// Store
pub use store::{BillingStore, InMemoryStore, PgStore};

// Subscriptions
pub use subscriptions::{ProrationPreview, ScheduledDowngrade, SubscriptionService, TierChangePlan};

// Webhooks
pub use webhooks::{sign_payload, WebhookHandler, WebhookOutcome, SIGNATURE_HEADER};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub access: AccessResolver,
    pub catalog: TierCatalog,
    pub checkout: CheckoutService,
    pub reconcile: ReconciliationService,
    pub settlement: Arc<SettlementProcessor>,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
    pub config: BillingConfig,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        let gateway_config = GatewayConfig::from_env()?;
        let webhook_secret = gateway_config.webhook_secret.clone();
        let gateway = GatewayClient::new(gateway_config)?;

        Ok(Self::new(
            Arc::new(PgStore::new(pool)),
            Arc::new(gateway),
            config,
            webhook_secret,
        ))
    }

    /// Create a new billing service over an explicit store and gateway
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: BillingConfig,
        webhook_secret: String,
    ) -> Self {
        let settlement = Arc::new(SettlementProcessor::new(
            store.clone(),
            gateway.clone(),
            config.clone(),
        ));

        Self {
            access: AccessResolver::new(store.clone()),
            catalog: TierCatalog::new(store.clone()),
            checkout: CheckoutService::new(store.clone(), gateway, config.clone()),
            reconcile: ReconciliationService::new(store.clone(), config.clone()),
            subscriptions: SubscriptionService::new(store, config.clone()),
            webhooks: WebhookHandler::new(
                settlement.clone(),
                webhook_secret,
                config.currency.clone(),
            ),
            settlement,
            config,
        }
    }
}
