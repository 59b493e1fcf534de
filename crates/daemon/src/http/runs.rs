// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run lifecycle endpoints.

use super::pipelines::load_pipeline;
use super::repos::load_repo;
use super::{ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use laf_core::{PipelineRun, RunId, Trigger, TriggerKind};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct StartRun {
    pub repo_id: String,
    pub pipeline_id: String,
    /// Branch the run executes against; the repo default when absent.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn start(
    State(state): State<AppState>,
    Json(body): Json<StartRun>,
) -> Result<Json<PipelineRun>, ApiError> {
    let repo = load_repo(&state, &body.repo_id)?;
    let definition = load_pipeline(&state, &body.pipeline_id)?;
    if definition.repo_id != repo.id {
        return Err(ApiError::BadRequest(
            "pipeline belongs to a different repo".to_string(),
        ));
    }

    let branch = body.branch.unwrap_or_else(|| repo.default_branch.clone());
    let handle = state.engine.git().repo(&repo.id)?;
    handle.ensure_branch(&branch, &repo.default_branch).await?;
    let commit_sha = handle.branch_sha(&branch).await?;

    let trigger = Trigger {
        kind: TriggerKind::Manual,
        actor: body.actor,
        card_id: None,
        branch,
        commit_sha,
        on_pass: None,
        on_fail: None,
    };

    let run_id = state
        .engine
        .start_run(laf_engine::StartRunRequest {
            repo_id: repo.id,
            definition,
            trigger,
        })
        .await?;
    load_run(&state, run_id.as_str()).map(Json)
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PipelineRun>, ApiError> {
    load_run(&state, &id).map(Json)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_for_repo(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PipelineRun>>, ApiError> {
    let repo = load_repo(&state, &repo_id)?;
    Ok(Json(state.engine.db().list_runs(&repo.id, query.limit)?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let run = load_run(&state, &id)?;
    if run.is_terminal() {
        return Err(ApiError::Conflict(format!("run {id} is already terminal")));
    }
    state.engine.cancel_run(&run.id).await?;
    Ok(Json(serde_json::json!({ "cancelling": true })))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    200
}

pub async fn step_logs(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, u32)>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let run = load_run(&state, &id)?;
    Ok(Json(state.engine.logs().tail(&run.id, index, query.tail)))
}

fn load_run(state: &AppState, id: &str) -> Result<PipelineRun, ApiError> {
    state
        .engine
        .db()
        .get_run(&RunId::new(id))?
        .ok_or_else(|| ApiError::NotFound(format!("unknown run: {id}")))
}
