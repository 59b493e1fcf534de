// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline definition CRUD with server-side graph validation.

use super::repos::{load_repo, now_ms};
use super::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::Json;
use laf_core::{IdGen, PipelineDefinition, PipelineId, UuidIdGen};

pub async fn create(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
    Json(mut def): Json<PipelineDefinition>,
) -> Result<Json<PipelineDefinition>, ApiError> {
    let repo = load_repo(&state, &repo_id)?;
    def.repo_id = repo.id;
    if def.id.as_str().is_empty() {
        def.id = PipelineId::new(UuidIdGen.next());
    }
    def.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.engine.db().insert_pipeline(&def, now_ms())?;
    Ok(Json(def))
}

pub async fn list(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> Result<Json<Vec<PipelineDefinition>>, ApiError> {
    let repo = load_repo(&state, &repo_id)?;
    Ok(Json(state.engine.db().list_pipelines(&repo.id)?))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PipelineDefinition>, ApiError> {
    load_pipeline(&state, &id).map(Json)
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut def): Json<PipelineDefinition>,
) -> Result<Json<PipelineDefinition>, ApiError> {
    let existing = load_pipeline(&state, &id)?;
    def.id = existing.id;
    def.repo_id = existing.repo_id;
    def.validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.engine.db().update_pipeline(&def)?;
    Ok(Json(def))
}

pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let existing = load_pipeline(&state, &id)?;
    state.engine.db().delete_pipeline(&existing.id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub(super) fn load_pipeline(state: &AppState, id: &str) -> Result<PipelineDefinition, ApiError> {
    state
        .engine
        .db()
        .get_pipeline(&PipelineId::new(id))?
        .ok_or_else(|| ApiError::NotFound(format!("unknown pipeline: {id}")))
}
