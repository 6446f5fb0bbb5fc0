//! HTTP routes

mod access;
mod payments;
mod subscriptions;
mod tiers;
mod webhooks;


use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    auth::{optional_auth, require_auth},
    state::AppState,
};

pub fn create_router(state: AppState) -> Router {
    let authenticated = Router::new()
        // Subscriptions
        .route("/subscriptions", post(subscriptions::subscribe))
        .route("/subscriptions/{id}", get(subscriptions::get_subscription))
        .route("/subscriptions/{id}/pause", post(subscriptions::pause))
        .route("/subscriptions/{id}/resume", post(subscriptions::resume))
        .route("/subscriptions/{id}/cancel", post(subscriptions::cancel))
        .route(
            "/subscriptions/{id}/pending-change",
            delete(subscriptions::cancel_pending_change),
        )
        .route("/subscriptions/{id}/preview", get(subscriptions::preview_tier_change))
        // Payments
        .route("/ppv/purchase", post(payments::purchase_post))
        .route("/payments/{reference}/verify", get(payments::verify_payment))
        // Tier catalog
        .route("/tiers", post(tiers::create_tier))
        .route("/tiers/{id}", delete(tiers::delete_tier))
        .route("/tiers/{id}/price", put(tiers::update_price))
        .route("/tiers/{id}/active", put(tiers::set_active))
        .route_layer(middleware::from_fn(require_auth));

    let public = Router::new()
        .route("/access/resolve", post(access::resolve))
        .route("/creators/{creator_id}/tiers", get(tiers::list_creator_tiers))
        .route_layer(middleware::from_fn(optional_auth));

    Router::new()
        .route("/health", get(health))
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .nest("/api/v1", authenticated.merge(public))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "ok",
            Err(e) => {
                tracing::error!(error = %e, "Health check database ping failed");
                "unavailable"
            }
        },
        None => "in_memory",
    };

    let status = if database == "unavailable" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "database": database,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
