//! Downloads API Routes

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::downloader::QueueSnapshot;
use crate::error::AwarrResult;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_downloads))
        .route("/:id/cancel", post(cancel_download))
        .route("/:id", delete(remove_download))
}

#[derive(Serialize)]
struct ActionResponse {
    success: bool,
}

/// GET /api/downloads - queue snapshot with config limits
async fn list_downloads(State(state): State<Arc<AppState>>) -> Json<QueueSnapshot> {
    Json(state.queue.snapshot())
}

/// POST /api/downloads/:id/cancel - cancel an in-flight download
async fn cancel_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AwarrResult<Json<ActionResponse>> {
    state.queue.cancel(&id)?;
    Ok(Json(ActionResponse { success: true }))
}

/// DELETE /api/downloads/:id - drop a pending item
async fn remove_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AwarrResult<Json<ActionResponse>> {
    state.queue.remove(&id)?;
    Ok(Json(ActionResponse { success: true }))
}
