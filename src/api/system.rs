//! System API Routes

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logring::LogEntry;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status))
        .route("/logs", get(logs))
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    sonarr_healthy: bool,
    sonarr_last_check: Option<DateTime<Utc>>,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        sonarr_healthy: state.sonarr.is_healthy(),
        sonarr_last_check: state.sonarr.last_check(),
    })
}

#[derive(Deserialize)]
struct LogsQuery {
    level: Option<String>,
    category: Option<String>,
}

/// GET /api/system/logs?level=warn&category=awarr::downloader
async fn logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    Json(
        state
            .log_ring
            .entries(query.level.as_deref(), query.category.as_deref()),
    )
}
