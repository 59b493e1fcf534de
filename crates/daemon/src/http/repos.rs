// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repo CRUD and git-substrate operations.

use super::{ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use laf_core::{IdGen, Repo, RepoId, SystemClock, UuidIdGen};
use laf_engine::Engine;
use laf_git::{BranchInfo, Commit, DiffSummary, MergeResult, SyncReport};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateRepo {
    pub name: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Serialize)]
pub struct RepoView {
    #[serde(flatten)]
    pub repo: Repo,
    pub clone_url: String,
}

fn view(state: &AppState, repo: Repo) -> RepoView {
    let clone_url = state.engine.git().clone_url(
        &format!("http://{}", state.engine.config().http_listen_addr),
        &repo.id,
        &repo.clone_token,
    );
    RepoView { repo, clone_url }
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateRepo>,
) -> Result<Json<RepoView>, ApiError> {
    let id = RepoId::new(UuidIdGen.next());
    let clone_token = Engine::<SystemClock>::mint_clone_token(&id, &state.boot_secret);

    state.engine.git().init_repo(&id, &body.default_branch).await?;
    let repo = Repo {
        id,
        name: body.name,
        default_branch: body.default_branch,
        clone_token,
        created_at_ms: now_ms(),
    };
    state.engine.db().insert_repo(&repo)?;
    Ok(Json(view(&state, repo)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<RepoView>>, ApiError> {
    let repos = state.engine.db().list_repos()?;
    Ok(Json(repos.into_iter().map(|r| view(&state, r)).collect()))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RepoView>, ApiError> {
    let repo = load_repo(&state, &id)?;
    Ok(Json(view(&state, repo)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let repo = load_repo(&state, &id)?;
    state.engine.git().delete_repo(&repo.id).await?;
    state.engine.db().delete_repo(&repo.id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct BranchesQuery {
    #[serde(default)]
    pub verify: Option<u8>,
}

pub async fn branches(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BranchesQuery>,
) -> Result<Json<Vec<BranchInfo>>, ApiError> {
    let repo = load_repo(&state, &id)?;
    let handle = state.engine.git().repo(&repo.id)?;
    let verify = query.verify.unwrap_or(0) != 0;
    Ok(Json(handle.branches(verify).await?))
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    pub branch: String,
    #[serde(default = "default_commit_limit")]
    pub limit: u32,
}

fn default_commit_limit() -> u32 {
    50
}

pub async fn commits(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CommitsQuery>,
) -> Result<Json<Vec<Commit>>, ApiError> {
    let repo = load_repo(&state, &id)?;
    let handle = state.engine.git().repo(&repo.id)?;
    Ok(Json(handle.commits(&query.branch, query.limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub base: String,
    pub head: String,
}

pub async fn diff(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<DiffSummary>, ApiError> {
    let repo = load_repo(&state, &id)?;
    let handle = state.engine.git().repo(&repo.id)?;
    Ok(Json(handle.diff(&query.base, &query.head).await?))
}

pub async fn sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncReport>, ApiError> {
    let repo = load_repo(&state, &id)?;
    Ok(Json(state.engine.git().sync_from_disk(&repo.id).await?))
}

pub async fn cleanup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let repo = load_repo(&state, &id)?;
    let removed = state.engine.git().cleanup_orphans(&repo.id).await?;
    Ok(Json(serde_json::json!({ "removed_worktrees": removed })))
}

#[derive(Debug, Deserialize)]
pub struct ReinitializeBody {
    #[serde(default)]
    pub confirm: bool,
}

pub async fn reinitialize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReinitializeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let repo = load_repo(&state, &id)?;
    state.engine.git().reinitialize(&repo.id, body.confirm).await?;
    Ok(Json(serde_json::json!({ "reinitialized": true })))
}

#[derive(Debug, Deserialize)]
pub struct Resolution {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub op_id: String,
    pub resolutions: Vec<Resolution>,
}

pub async fn resolve_conflicts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<MergeResult>, ApiError> {
    let repo = load_repo(&state, &id)?;
    let resolutions: Vec<(String, String)> = body
        .resolutions
        .into_iter()
        .map(|r| (r.path, r.content))
        .collect();
    let result = state
        .engine
        .git()
        .resolve_conflicts(&repo.id, &body.op_id, &resolutions)
        .await?;
    Ok(Json(result))
}

pub(super) fn load_repo(state: &AppState, id: &str) -> Result<Repo, ApiError> {
    state
        .engine
        .db()
        .get_repo(&RepoId::new(id))?
        .ok_or_else(|| ApiError::NotFound(format!("unknown repo: {id}")))
}

pub(super) fn now_ms() -> u64 {
    use laf_core::Clock;
    SystemClock.epoch_ms()
}
