//! Payment gateway webhook handling
//!
//! Deliveries are authenticated with `X-Signature`, a hex HMAC-SHA512 of the
//! raw request body keyed with the webhook secret. Nothing is parsed until the
//! signature checks out.

use std::sync::Arc;

use fanvault_shared::{Currency, Money};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::client::ChargeStatus;
use crate::error::{BillingError, BillingResult};
use crate::settlement::{GatewayReport, SettlementProcessor, SettlementResult};

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-signature";

const CHARGE_SUCCESS: &str = "charge.success";
const CHARGE_FAILED: &str = "charge.failed";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    data: ChargeData,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    reference: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// What a delivery did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed { result: SettlementResult },
    Ignored { event: String },
}

/// Webhook handler for gateway charge events
pub struct WebhookHandler {
    settlement: Arc<SettlementProcessor>,
    secret: String,
    currency: Currency,
}

impl WebhookHandler {
    pub fn new(settlement: Arc<SettlementProcessor>, secret: String, currency: Currency) -> Self {
        Self {
            settlement,
            secret,
            currency,
        }
    }

    /// Check the delivery signature in constant time
    pub fn verify_signature(&self, payload: &[u8], signature: Option<&str>) -> BillingResult<()> {
        let signature = signature.ok_or_else(|| {
            tracing::warn!(payload_len = payload.len(), "Webhook delivered without signature");
            BillingError::WebhookSignatureInvalid
        })?;

        let provided = hex::decode(signature.trim()).map_err(|_| {
            tracing::warn!("Webhook signature is not hex");
            BillingError::WebhookSignatureInvalid
        })?;

        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(payload);
        let computed = mac.finalize().into_bytes();

        if !bool::from(computed.as_slice().ct_eq(&provided)) {
            tracing::warn!(payload_len = payload.len(), "Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }
        Ok(())
    }

    /// Verify, parse and dispatch one delivery
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        self.verify_signature(payload, signature)?;

        let event: WebhookEvent = serde_json::from_slice(payload)?;
        let reference = event.data.reference.clone();

        match event.event.as_str() {
            CHARGE_SUCCESS => {
                let currency = match event.data.currency.as_deref() {
                    Some(code) => Currency::new(code)?,
                    None => self.currency.clone(),
                };
                let status = event
                    .data
                    .status
                    .as_deref()
                    .map(ChargeStatus::from_gateway)
                    .unwrap_or(ChargeStatus::Success);

                tracing::info!(reference = %reference, event = CHARGE_SUCCESS, "Processing webhook");
                let result = self
                    .settlement
                    .settle(
                        &reference,
                        GatewayReport {
                            status,
                            amount: Money::new(event.data.amount, currency),
                            metadata: event.data.metadata,
                        },
                        now,
                    )
                    .await?;
                Ok(WebhookOutcome::Processed { result })
            }
            CHARGE_FAILED => {
                tracing::info!(reference = %reference, event = CHARGE_FAILED, "Processing webhook");
                let detail = serde_json::json!({
                    "event": CHARGE_FAILED,
                    "metadata": event.data.metadata,
                });
                let result = self
                    .settlement
                    .record_failure(&reference, detail, now)
                    .await?;
                Ok(WebhookOutcome::Processed { result })
            }
            other => {
                tracing::debug!(event = %other, reference = %reference, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored {
                    event: other.to_string(),
                })
            }
        }
    }
}

/// Hex HMAC-SHA512 of `payload`, as the gateway signs deliveries
pub fn sign_payload(secret: &str, payload: &[u8]) -> BillingResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Config(format!("Invalid webhook secret: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
