use crate::{
    error::{AppError, Result},
    models::push::{SubscribePushRequest, UnsubscribePushRequest},
    services::auth::User,
    state::AppState,
};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/vapid-public-key", get(get_vapid_public_key))
}

/// Register a browser push subscription
/// POST /api/portal/push/subscribe
async fn subscribe(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<SubscribePushRequest>,
) -> Result<Json<Value>> {
    debug!("Push subscription for: {}", user.id);

    let subscription = state
        .preference_service
        .subscribe_push(&user.id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": subscription,
        "message": "Push notifications enabled"
    })))
}

/// Remove a browser push subscription
/// POST /api/portal/push/unsubscribe
async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<UnsubscribePushRequest>,
) -> Result<Json<Value>> {
    state
        .preference_service
        .unsubscribe_push(&user.id, &request.endpoint)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Push notifications disabled"
    })))
}

/// Public VAPID key for the browser's PushManager
/// GET /api/portal/push/vapid-public-key
async fn get_vapid_public_key(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let key = state
        .dispatch_service
        .channels()
        .vapid_public_key()
        .ok_or_else(|| {
            AppError::ServiceUnavailable("Push notifications are not enabled".to_string())
        })?;

    Ok(Json(json!({
        "success": true,
        "data": { "public_key": key }
    })))
}
