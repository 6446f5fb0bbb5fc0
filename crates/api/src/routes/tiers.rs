//! Tier catalog routes
//!
//! The authenticated caller acts as the creator.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use fanvault_billing::{NewTier, SubscriptionTier};
use fanvault_shared::Money;
use serde::Deserialize;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct PriceBody {
    pub monthly_price: Money,
}

#[derive(Debug, Deserialize)]
pub struct ActiveBody {
    pub active: bool,
}

pub async fn list_creator_tiers(
    State(state): State<AppState>,
    Path(creator_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SubscriptionTier>>> {
    let tiers = state.billing.catalog.list_creator_tiers(creator_id).await?;
    Ok(Json(tiers))
}

pub async fn create_tier(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<NewTier>,
) -> ApiResult<(StatusCode, Json<SubscriptionTier>)> {
    let tier = state
        .billing
        .catalog
        .create_tier(auth_user.user_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(tier)))
}

pub async fn update_price(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<PriceBody>,
) -> ApiResult<Json<SubscriptionTier>> {
    let tier = state
        .billing
        .catalog
        .update_tier_price(auth_user.user_id, id, body.monthly_price)
        .await?;
    Ok(Json(tier))
}

pub async fn set_active(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActiveBody>,
) -> ApiResult<Json<SubscriptionTier>> {
    let tier = state
        .billing
        .catalog
        .set_tier_active(auth_user.user_id, id, body.active)
        .await?;
    Ok(Json(tier))
}

pub async fn delete_tier(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.billing.catalog.delete_tier(auth_user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
