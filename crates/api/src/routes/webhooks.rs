//! Payment gateway webhook endpoint

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use fanvault_billing::{WebhookOutcome, SIGNATURE_HEADER};
use time::OffsetDateTime;

use crate::{error::ApiResult, state::AppState};

/// Raw body is required; the signature covers the exact bytes sent
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookOutcome>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let outcome = state
        .billing
        .webhooks
        .handle(&body, signature, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(outcome))
}
