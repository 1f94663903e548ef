use crate::{
    error::Result,
    models::{notification::NotificationHistoryQuery, preference::UpdatePreferenceRequest},
    services::auth::User,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_history))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/unread-count", get(get_unread_count))
        .route("/latest", get(get_latest))
        .route("/read-all", post(mark_all_read))
        .route("/:id/read", post(mark_read))
}

/// Get the caller's notification settings
/// GET /api/portal/notifications/settings
async fn get_settings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>> {
    let preferences = state.preference_service.get_or_default(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": preferences
    })))
}

/// Update the caller's notification settings
/// PUT /api/portal/notifications/settings
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdatePreferenceRequest>,
) -> Result<Json<Value>> {
    debug!("Updating notification settings for: {}", user.id);

    let preferences = state.preference_service.update(&user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": preferences,
        "message": "Notification settings updated"
    })))
}

/// Get the caller's notification history
/// GET /api/portal/notifications
async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<NotificationHistoryQuery>,
) -> Result<Json<Value>> {
    let history = state.notification_service.history(&user.id, &query).await?;
    let unread_count = state.notification_service.unread_count(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": history,
        "unread_count": unread_count
    })))
}

/// Get the number of unread notifications
/// GET /api/portal/notifications/unread-count
async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>> {
    let count = state.notification_service.unread_count(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "unread_count": count }
    })))
}

/// Latest delivered notification, fetched by the service worker on push
/// GET /api/portal/notifications/latest
async fn get_latest(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>> {
    let latest = state.notification_service.latest(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": latest
    })))
}

/// Mark a notification as read
/// POST /api/portal/notifications/:id/read
async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>> {
    let notification = state
        .notification_service
        .mark_read(&user.id, &notification_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": notification
    })))
}

/// Mark every notification as read
/// POST /api/portal/notifications/read-all
async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>> {
    let updated = state.notification_service.mark_all_read(&user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "updated": updated }
    })))
}
