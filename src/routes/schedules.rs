use crate::{
    error::Result,
    models::schedule::*,
    services::{auth::User, worker::Task},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_schedules).post(create_schedule))
        .route("/cancel", post(cancel_schedules))
        .route("/:id", get(get_schedule))
        .route("/:id/cancel", post(cancel_schedule))
        .route("/:id/execute", post(execute_schedule))
}

/// List schedules, newest first
/// GET /api/admin/schedules
async fn list_schedules(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let schedules = state.schedule_service.list().await?;

    Ok(Json(json!({
        "success": true,
        "data": schedules
    })))
}

/// Schedule a template for a future time
/// POST /api/admin/schedules
async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Json<Value>> {
    debug!("Creating schedule {} by {}", request.name, user.id);

    let schedule = state
        .schedule_service
        .create(request, Some(user.id))
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": schedule,
        "message": "Schedule created successfully"
    })))
}

/// Get a schedule
/// GET /api/admin/schedules/:id
async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
) -> Result<Json<Value>> {
    let schedule = state.schedule_service.get(&schedule_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": schedule
    })))
}

/// Cancel a pending schedule
/// POST /api/admin/schedules/:id/cancel
async fn cancel_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
) -> Result<Json<Value>> {
    let schedule = state.schedule_service.cancel(&schedule_id).await?;

    Ok(Json(json!({
        "success": true,
        "data": schedule,
        "message": "Schedule cancelled"
    })))
}

/// Cancel several schedules; entries that are not pending are skipped
/// POST /api/admin/schedules/cancel
async fn cancel_schedules(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CancelSchedulesRequest>,
) -> Result<Json<Value>> {
    let cancelled = state.schedule_service.cancel_many(&request.ids).await?;

    Ok(Json(json!({
        "success": true,
        "data": { "cancelled": cancelled },
        "message": format!("{} schedule(s) cancelled", cancelled)
    })))
}

/// Execute a pending schedule now
/// POST /api/admin/schedules/:id/execute
async fn execute_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
) -> Result<Json<Value>> {
    let schedule = state.schedule_service.claim_now(&schedule_id).await?;
    debug!("Executing schedule {} now", schedule.name);

    let status = match state
        .runner
        .submit(Task::ExecuteSchedule {
            schedule_id: schedule_id.clone(),
        })
        .await
    {
        Ok(status) => status,
        Err(e) => {
            if let Err(release_err) = state.schedule_service.release(&schedule_id).await {
                error!("Failed to release schedule {}: {}", schedule_id, release_err);
            }
            return Err(e);
        }
    };

    Ok(Json(json!({
        "success": true,
        "data": status,
        "message": format!("Schedule \"{}\" is executing", schedule.name)
    })))
}
