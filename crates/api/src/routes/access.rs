//! Access decisions for posts owned by the content service

use axum::{
    extract::{Extension, State},
    Json,
};
use fanvault_billing::{Decision, Post};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{auth::Viewer, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub post: Post,
}

pub async fn resolve(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Json(body): Json<ResolveBody>,
) -> ApiResult<Json<Decision>> {
    let user_id = viewer.0.map(|u| u.user_id);
    let decision = state
        .billing
        .access
        .resolve(user_id, &body.post, OffsetDateTime::now_utc())
        .await?;

    tracing::debug!(
        post_id = %body.post.id,
        user_id = ?user_id,
        granted = decision.is_granted(),
        "Resolved post access"
    );
    Ok(Json(decision))
}
