//! API error type and HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fanvault_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Billing(e) => match e {
                BillingError::Validation(_) => StatusCode::BAD_REQUEST,
                BillingError::Authorization(_) => StatusCode::FORBIDDEN,
                BillingError::Conflict(_) => StatusCode::CONFLICT,
                BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                BillingError::Gateway(_) => StatusCode::BAD_GATEWAY,
                BillingError::WebhookSignatureInvalid => StatusCode::UNAUTHORIZED,
                BillingError::State(_) => StatusCode::UNPROCESSABLE_ENTITY,
                BillingError::Database(_) | BillingError::Http(_) | BillingError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Signature failures get no detail at all
        if matches!(self, ApiError::Billing(BillingError::WebhookSignatureInvalid)) {
            return status.into_response();
        }

        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
