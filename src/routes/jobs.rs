use crate::{
    error::Result,
    services::{jobs::RecurringJob, worker::Task},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:name/run", post(run_job))
}

/// List recurring jobs and their cadence
/// GET /api/admin/jobs
async fn list_jobs() -> Json<Value> {
    let jobs: Vec<Value> = RecurringJob::ALL
        .iter()
        .map(|job| {
            json!({
                "name": job.name(),
                "cron": job.cron_expression(),
            })
        })
        .collect();

    Json(json!({
        "success": true,
        "data": jobs
    }))
}

/// Trigger a recurring job on demand
/// POST /api/admin/jobs/:name/run
async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    let job: RecurringJob = name.parse()?;
    info!("Manual run of job {}", job);

    let status = state.runner.submit(Task::RunJob(job)).await?;

    Ok(Json(json!({
        "success": true,
        "data": status
    })))
}
