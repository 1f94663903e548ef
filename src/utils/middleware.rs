use crate::{
    error::{AppError, Result},
    services::auth::User,
    state::AppState,
};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// 认证中间件：校验 bearer token，把调用方放进请求扩展
pub async fn auth_middleware<B>(
    State(app_state): State<Arc<AppState>>,
    mut request: Request<B>,
    next: Next<B>,
) -> Result<Response> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let user = app_state.auth_service.authenticate(header)?;
    debug!("Authenticated caller: {}", user.id);

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// 管理端中间件，需在 auth_middleware 之后
pub async fn require_admin<B>(request: Request<B>, next: Next<B>) -> Result<Response> {
    let user = request
        .extensions()
        .get::<User>()
        .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    if !user.is_admin() {
        warn!("Non-admin caller {} tried {}", user.id, request.uri().path());
        return Err(AppError::forbidden("Admin role required"));
    }

    Ok(next.run(request).await)
}
