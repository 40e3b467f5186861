//! Settings API Routes

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use crate::db::models::RootFolder;
use crate::error::{AwarrError, AwarrResult};
use crate::sonarr::types::Tag;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_settings))
        .route("/", put(update_settings))
        .route("/tags", get(list_tags))
        .route("/rootfolders", get(list_root_folders))
        .route("/rootfolders/:id/mapping", put(set_root_folder_mapping))
}

#[derive(Serialize)]
struct UpdateResponse {
    updated: usize,
}

/// GET /api/settings - all settings with effective defaults
async fn list_settings(State(state): State<Arc<AppState>>) -> Json<HashMap<String, Value>> {
    Json(state.settings.list())
}

/// PUT /api/settings - partial update, body is a key -> value map
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HashMap<String, Value>>,
) -> AwarrResult<Json<UpdateResponse>> {
    let mut updated = 0;
    for (key, value) in body {
        state
            .settings
            .set(&key, value)
            .map_err(|e| AwarrError::Database(e.to_string()))?;
        updated += 1;
    }
    Ok(Json(UpdateResponse { updated }))
}

/// GET /api/settings/tags - Sonarr's tag list, for the tag-policy picker
async fn list_tags(State(state): State<Arc<AppState>>) -> AwarrResult<Json<Vec<Tag>>> {
    Ok(Json(state.sonarr.get_tags().await?))
}

/// GET /api/settings/rootfolders - local root-folder rows with mappings
async fn list_root_folders(
    State(state): State<Arc<AppState>>,
) -> AwarrResult<Json<Vec<RootFolder>>> {
    Ok(Json(state.store.list_root_folders()?))
}

#[derive(serde::Deserialize)]
struct MappingBody {
    mapped_path: Option<String>,
}

/// PUT /api/settings/rootfolders/:id/mapping - set or clear the local path
async fn set_root_folder_mapping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<MappingBody>,
) -> AwarrResult<Json<serde_json::Value>> {
    let known = state.store.list_root_folders()?.iter().any(|f| f.id == id);
    if !known {
        return Err(AwarrError::NotFound(format!("root folder {}", id)));
    }
    state
        .store
        .set_root_folder_mapping(id, body.mapped_path.as_deref())?;
    Ok(Json(serde_json::json!({ "success": true })))
}
