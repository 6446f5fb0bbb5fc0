//! PPV checkout and payment verification routes

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use fanvault_billing::{InitiationResult, Post, PpvRequest, SettlementResult};
use serde::Deserialize;
use time::OffsetDateTime;

use super::subscriptions::checkout_email;
use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    pub post: Post,
    pub email: Option<String>,
}

pub async fn purchase_post(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<PurchaseBody>,
) -> ApiResult<(StatusCode, Json<InitiationResult>)> {
    let email = checkout_email(body.email, &auth_user)?;
    let result = state
        .billing
        .checkout
        .initiate_ppv(
            PpvRequest {
                subscriber_id: auth_user.user_id,
                email,
                post: body.post,
            },
            OffsetDateTime::now_utc(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Client poll after the gateway redirect
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(reference): Path<String>,
) -> ApiResult<Json<SettlementResult>> {
    let result = state
        .billing
        .settlement
        .verify_and_settle(&reference, auth_user.user_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(result))
}
