//! Tasks API Routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AwarrError, AwarrResult};
use crate::tasks::TaskRecord;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/:id/run", post(run_task))
}

#[derive(Serialize)]
struct RunResponse {
    started: bool,
}

/// GET /api/tasks - task records with status and schedule
async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskRecord>> {
    Json(state.scheduler.list())
}

/// POST /api/tasks/:id/run - manual trigger, fire and forget
async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AwarrResult<Json<RunResponse>> {
    let known = state.scheduler.list().iter().any(|t| t.id == id);
    if !known {
        return Err(AwarrError::NotFound(format!("task '{}'", id)));
    }
    let started = state.scheduler.execute_task_now(&id);
    Ok(Json(RunResponse { started }))
}
