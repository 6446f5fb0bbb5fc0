//! Payment gateway client
//!
//! The billing core needs two outbound calls: start a hosted charge and look a
//! charge up by reference. [`PaymentGateway`] is that seam; [`GatewayClient`]
//! implements it against a Paystack-style REST API.

use std::time::Duration;

use async_trait::async_trait;
use fanvault_shared::{Currency, Money};
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};

const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

/// Gateway credentials and endpoints
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    /// HMAC key for webhook signatures
    pub webhook_secret: String,
    pub callback_url: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("PAYMENT_GATEWAY_SECRET_KEY")
            .map_err(|_| BillingError::Config("PAYMENT_GATEWAY_SECRET_KEY not set".to_string()))?;
        let webhook_secret =
            std::env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_else(|_| secret_key.clone());

        Ok(Self {
            base_url: std::env::var("PAYMENT_GATEWAY_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            secret_key,
            webhook_secret,
            callback_url: std::env::var("PAYMENT_CALLBACK_URL").ok(),
        })
    }
}

/// Outbound charge initiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub reference: String,
    pub email: String,
    pub amount: Money,
    pub metadata: serde_json::Value,
}

/// Where to send the payer to complete a charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSession {
    pub authorization_url: String,
    pub reference: String,
}

/// Charge state as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Failed,
    Abandoned,
    Pending,
}

impl ChargeStatus {
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "success" => ChargeStatus::Success,
            "failed" | "reversed" => ChargeStatus::Failed,
            "abandoned" => ChargeStatus::Abandoned,
            _ => ChargeStatus::Pending,
        }
    }
}

/// Result of looking a charge up by reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCharge {
    pub reference: String,
    pub status: ChargeStatus,
    pub amount: Money,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_charge(&self, request: &ChargeRequest) -> BillingResult<ChargeSession>;

    async fn verify_charge(&self, reference: &str) -> BillingResult<VerifiedCharge>;
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: &'a serde_json::Value,
}

/// Gateway response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// reqwest-backed gateway client
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> BillingResult<T> {
        let status = response.status();
        if status.is_server_error() {
            return Err(response
                .error_for_status()
                .err()
                .map(BillingError::Http)
                .unwrap_or_else(|| BillingError::Gateway(format!("Gateway returned {}", status))));
        }

        let body = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        if !status.is_success() || !envelope.status {
            return Err(BillingError::Gateway(format!(
                "Gateway rejected request ({}): {}",
                status, envelope.message
            )));
        }
        envelope
            .data
            .ok_or_else(|| BillingError::Gateway("Gateway response has no data".to_string()))
    }

    async fn verify_once(&self, reference: &str) -> BillingResult<VerifiedCharge> {
        let response = self
            .http
            .get(self.url(&format!("/transaction/verify/{}", reference)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        let data: VerifyData = Self::read_envelope(response).await?;
        let currency = Currency::new(&data.currency)?;

        Ok(VerifiedCharge {
            reference: data.reference,
            status: ChargeStatus::from_gateway(&data.status),
            amount: Money::new(data.amount, currency),
            metadata: data.metadata,
        })
    }
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn initiate_charge(&self, request: &ChargeRequest) -> BillingResult<ChargeSession> {
        let body = InitializeBody {
            email: &request.email,
            amount: request.amount.minor,
            currency: request.amount.currency.code(),
            reference: &request.reference,
            callback_url: self.config.callback_url.as_deref(),
            metadata: &request.metadata,
        };

        let response = self
            .http
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await?;

        let data: InitializeData = Self::read_envelope(response).await?;

        tracing::info!(
            reference = %data.reference,
            amount = %request.amount,
            "Initialized gateway charge"
        );

        Ok(ChargeSession {
            authorization_url: data.authorization_url,
            reference: data.reference,
        })
    }

    async fn verify_charge(&self, reference: &str) -> BillingResult<VerifiedCharge> {
        let strategy = ExponentialBackoff::from_millis(10)
            .max_delay(Duration::from_secs(1))
            .take(3);

        RetryIf::spawn(
            strategy,
            || self.verify_once(reference),
            |e: &BillingError| {
                let retry = e.is_retryable();
                if retry {
                    tracing::warn!(reference = %reference, error = %e, "Retrying charge verification");
                }
                retry
            },
        )
        .await
    }
}
