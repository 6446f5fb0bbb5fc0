//! Billing error types

use fanvault_shared::MoneyError;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors raised by the billing core
///
/// `Validation`, `Authorization`, `NotFound` and `State` are caller errors and
/// are never retried. `Conflict` is surfaced for user actions; settlement races
/// are resolved into idempotent successes before they reach this type.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Invalid subscription state: {0}")]
    State(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    pub fn unknown_reference(reference: &str) -> Self {
        BillingError::NotFound(format!("Unknown payment reference {}", reference))
    }

    /// Whether the caller supplied bad input or acted out of turn
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::Validation(_)
                | BillingError::Authorization(_)
                | BillingError::Conflict(_)
                | BillingError::NotFound(_)
                | BillingError::State(_)
        )
    }

    /// Transport failures and gateway 5xx responses, worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error() {
            if db.is_unique_violation() {
                return BillingError::Conflict(db.message().to_string());
            }
        }
        BillingError::Database(e.to_string())
    }
}

impl From<MoneyError> for BillingError {
    fn from(e: MoneyError) -> Self {
        BillingError::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(e: serde_json::Error) -> Self {
        BillingError::Gateway(format!("Malformed payload: {}", e))
    }
}
