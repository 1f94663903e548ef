pub mod jobs;
pub mod notifications;
pub mod push;
pub mod roster;
pub mod schedules;
pub mod templates;

use crate::{
    error::Result,
    state::AppState,
    utils::middleware::{auth_middleware, require_admin},
};
use axum::{extract::State, middleware, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

/// 管理端路由，需要 admin 角色
pub fn admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .nest("/templates", templates::router())
        .nest("/schedules", schedules::router())
        .nest("/jobs", jobs::router())
        .merge(roster::router())
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// 客户门户路由，token 的 sub 即客户 ID
pub fn portal_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .nest("/notifications", notifications::router())
        .nest("/push", push::router())
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/admin", admin_router(state.clone()))
        .nest("/api/portal", portal_router(state.clone()))
        .with_state(state)
}

/// Health check including the database connection
/// GET /health
async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    state.db.verify_connection().await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "sms_enabled": state.dispatch_service.channels().sms_enabled(),
            "push_enabled": state.dispatch_service.channels().push_enabled(),
            "background_worker": state.runner.is_background(),
        }
    })))
}
