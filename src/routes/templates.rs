use crate::{
    error::{AppError, Result},
    models::template::*,
    services::{auth::User, worker::Task},
    state::AppState,
    utils::validation::validate_email_format,
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
use validator::Validate;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route(
            "/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/:id/preview", get(preview_template))
        .route("/:id/send", post(send_template))
        .route("/:id/duplicate", post(duplicate_template))
        .route("/:id/test-email", post(send_test_email))
}

/// List notification templates
/// GET /api/admin/templates
async fn list_templates(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let templates = state.template_service.list().await?;

    Ok(Json(json!({
        "success": true,
        "data": templates
    })))
}

/// Create a notification template
/// POST /api/admin/templates
async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<Json<Value>> {
    debug!("Creating template: {}", request.name);

    let template = state.template_service.create(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": template,
        "message": "Template created successfully"
    })))
}

/// Get a template
/// GET /api/admin/templates/:id
async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<String>,
) -> Result<Json<Value>> {
    let template = state.template_service.get(&template_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": template
    })))
}

/// Update a template
/// PUT /api/admin/templates/:id
async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<String>,
    Json(request): Json<UpdateTemplateRequest>,
) -> Result<Json<Value>> {
    debug!("Updating template: {}", template_id);

    let template = state.template_service.update(&template_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": template,
        "message": "Template updated successfully"
    })))
}

/// Delete a template
/// DELETE /api/admin/templates/:id
async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<String>,
) -> Result<Json<Value>> {
    state.template_service.delete(&template_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Template deleted successfully"
    })))
}

/// Count the recipients a template would reach; query parameters override its filter
/// GET /api/admin/templates/:id/preview
async fn preview_template(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<String>,
    Query(filter): Query<TargetFilter>,
) -> Result<Json<Value>> {
    let filter = Some(filter).filter(|f| !f.is_empty());
    let count = state.campaign_service.preview(&template_id, filter).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "recipient_count": count }
    })))
}

/// Send Campaign Now
/// POST /api/admin/templates/:id/send
async fn send_template(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<String>,
) -> Result<Json<Value>> {
    let template = state.campaign_service.ensure_sendable(&template_id).await?;
    debug!("Sending campaign for template: {}", template.name);

    let status = state
        .runner
        .submit(Task::SendCampaign { template_id })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": status,
        "message": format!("Campaign \"{}\" started", template.name)
    })))
}

/// Copy a template as an inactive "(Copy)"
/// POST /api/admin/templates/:id/duplicate
async fn duplicate_template(
    State(state): State<Arc<AppState>>,
    Path(template_id): Path<String>,
) -> Result<Json<Value>> {
    let copy = state.template_service.duplicate(&template_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": copy,
        "message": "Template duplicated successfully"
    })))
}

/// Render with sample data and email it to the given address or the caller
/// POST /api/admin/templates/:id/test-email
async fn send_test_email(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(template_id): Path<String>,
    Json(request): Json<TestEmailRequest>,
) -> Result<Json<Value>> {
    request.validate()?;

    let to = request
        .to_email
        .or(user.email)
        .ok_or_else(|| AppError::validation("to_email is required"))?;
    validate_email_format(&to)?;

    state
        .campaign_service
        .send_test_email(&template_id, &to)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Test email sent to {}", to)
    })))
}
