use crate::{
    error::Result,
    models::{client::*, notification::SendDirectRequest, template::TemplateKind},
    services::worker::Task,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct NotifyBookingRequest {
    pub kind: TemplateKind,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/clients", get(list_clients).post(create_client))
        .route("/clients/:id", get(get_client))
        .route("/clients/:id/notify", post(notify_client))
        .route("/bookings", post(create_booking))
        .route("/bookings/:id/notify", post(notify_booking))
        .route("/packages", post(create_package))
        .route("/assessments", post(create_assessment))
        .route("/assessments/:id/notify", post(notify_assessment))
        .route("/events", get(list_events).post(create_event))
        .route(
            "/push-subscriptions/:id/deactivate",
            post(deactivate_push_subscription),
        )
}

/// List clients
/// GET /api/admin/clients
async fn list_clients(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let clients = state.roster_service.list_clients().await?;

    Ok(Json(json!({
        "success": true,
        "data": clients
    })))
}

/// Register a client
/// POST /api/admin/clients
async fn create_client(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateClientRequest>,
) -> Result<Json<Value>> {
    debug!("Registering client: {}", request.username);

    let client = state.roster_service.create_client(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": client
    })))
}

/// Get a client with their notification preferences
/// GET /api/admin/clients/:id
async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<Value>> {
    let client = state.roster_service.get_client(&client_id).await?;
    let preferences = state.preference_service.get_or_default(&client_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "client": client,
            "preferences": preferences
        }
    })))
}

/// Record a booking
/// POST /api/admin/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<Json<Value>> {
    let booking = state.roster_service.create_booking(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": booking
    })))
}

/// Send a booking confirmation or cancellation notice
/// POST /api/admin/bookings/:id/notify
async fn notify_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<String>,
    Json(request): Json<NotifyBookingRequest>,
) -> Result<Json<Value>> {
    // 先确认预约存在，排队模式下也能立即返回 404
    state.roster_service.get_booking(&booking_id).await?;

    let status = state
        .runner
        .submit(Task::NotifyBooking {
            booking_id,
            kind: request.kind,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": status
    })))
}

/// Send a title and message directly to one client
/// POST /api/admin/clients/:id/notify
async fn notify_client(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(request): Json<SendDirectRequest>,
) -> Result<Json<Value>> {
    request.validate()?;
    state.roster_service.get_client(&client_id).await?;

    let status = state
        .runner
        .submit(Task::SendDirect {
            client_id,
            kind: request.kind.unwrap_or(TemplateKind::Promotional),
            title: request.title,
            message: request.message,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": status
    })))
}

/// Record a player assessment
/// POST /api/admin/assessments
async fn create_assessment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAssessmentRequest>,
) -> Result<Json<Value>> {
    let assessment = state.roster_service.create_assessment(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": assessment
    })))
}

/// Tell the client an assessment is ready
/// POST /api/admin/assessments/:id/notify
async fn notify_assessment(
    State(state): State<Arc<AppState>>,
    Path(assessment_id): Path<String>,
) -> Result<Json<Value>> {
    state.roster_service.get_assessment(&assessment_id).await?;

    let status = state
        .runner
        .submit(Task::NotifyAssessment { assessment_id })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": status
    })))
}

/// Record a client package
/// POST /api/admin/packages
async fn create_package(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateClientPackageRequest>,
) -> Result<Json<Value>> {
    let package = state.roster_service.create_package(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": package
    })))
}

/// List events
/// GET /api/admin/events
async fn list_events(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let events = state.roster_service.list_events().await?;

    Ok(Json(json!({
        "success": true,
        "data": events
    })))
}

/// Record an event
/// POST /api/admin/events
async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateEventRequest>,
) -> Result<Json<Value>> {
    let event = state.roster_service.create_event(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": event
    })))
}

/// Deactivate a push subscription
/// POST /api/admin/push-subscriptions/:id/deactivate
async fn deactivate_push_subscription(
    State(state): State<Arc<AppState>>,
    Path(subscription_id): Path<String>,
) -> Result<Json<Value>> {
    state.preference_service.deactivate(&subscription_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Push subscription deactivated"
    })))
}
