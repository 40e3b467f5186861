//! Library API Routes
//!
//! Read access to the mirrored series/season view plus the two per-series
//! flags the sync never touches (language override, absolute numbering).

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::models::{LanguagePreference, Season, Series};
use crate::error::{AwarrError, AwarrResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_series))
        .route("/:id/seasons", get(list_seasons))
        .route("/:id/language", put(set_language))
        .route("/:id/absolute", put(set_absolute))
}

#[derive(Serialize)]
struct SeriesListResponse {
    series: Vec<Series>,
}

async fn list_series(State(state): State<Arc<AppState>>) -> AwarrResult<Json<SeriesListResponse>> {
    let series = state.store.list_series(false)?;
    Ok(Json(SeriesListResponse { series }))
}

async fn list_seasons(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AwarrResult<Json<Vec<Season>>> {
    state
        .store
        .get_series(id)?
        .ok_or_else(|| AwarrError::NotFound(format!("series {}", id)))?;
    Ok(Json(state.store.list_seasons(id)?))
}

#[derive(Deserialize)]
struct LanguageBody {
    /// `dub`, `sub`, `dub_fallback_sub`, or null to fall back to the global
    /// preference.
    language: Option<String>,
}

async fn set_language(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<LanguageBody>,
) -> AwarrResult<Json<serde_json::Value>> {
    state
        .store
        .get_series(id)?
        .ok_or_else(|| AwarrError::NotFound(format!("series {}", id)))?;
    let language = body.language.map(|s| LanguagePreference::parse(&s));
    state.store.set_series_language(id, language)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct AbsoluteBody {
    absolute: bool,
}

async fn set_absolute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<AbsoluteBody>,
) -> AwarrResult<Json<serde_json::Value>> {
    state
        .store
        .get_series(id)?
        .ok_or_else(|| AwarrError::NotFound(format!("series {}", id)))?;
    state.store.set_series_absolute(id, body.absolute)?;
    Ok(Json(serde_json::json!({ "success": true })))
}
