//! Subscription routes

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use fanvault_billing::{InitiationResult, ProrationPreview, SubscribeRequest, Subscription};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    pub tier_id: Uuid,
    /// Falls back to the forwarded user email
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub target_tier_id: Uuid,
}

/// Payer email for the gateway checkout
pub(super) fn checkout_email(body_email: Option<String>, auth_user: &AuthUser) -> ApiResult<String> {
    body_email
        .or_else(|| auth_user.email.clone())
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::BadRequest("An email address is required for checkout".to_string()))
}

pub async fn subscribe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<SubscribeBody>,
) -> ApiResult<(StatusCode, Json<InitiationResult>)> {
    let email = checkout_email(body.email, &auth_user)?;
    let result = state
        .billing
        .checkout
        .initiate_subscription(
            SubscribeRequest {
                subscriber_id: auth_user.user_id,
                email,
                tier_id: body.tier_id,
            },
            OffsetDateTime::now_utc(),
        )
        .await?;

    let status = match result {
        InitiationResult::PaymentRequired { .. } => StatusCode::CREATED,
        InitiationResult::TierSwitched { .. } | InitiationResult::DowngradeScheduled { .. } => {
            StatusCode::OK
        }
    };
    Ok((status, Json(result)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state.billing.subscriptions.get(id, auth_user.user_id).await?;
    Ok(Json(subscription))
}

pub async fn pause(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .subscriptions
        .pause(id, auth_user.user_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(subscription))
}

pub async fn resume(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .subscriptions
        .resume(id, auth_user.user_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(subscription))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .subscriptions
        .cancel(id, auth_user.user_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(subscription))
}

pub async fn cancel_pending_change(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .subscriptions
        .cancel_pending_change(id, auth_user.user_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(subscription))
}

pub async fn preview_tier_change(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Json<ProrationPreview>> {
    let preview = state
        .billing
        .subscriptions
        .preview_tier_change(id, auth_user.user_id, query.target_tier_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(preview))
}
