// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface consumed by the UI collaborator.
//!
//! REST over the §3 entities, a WebSocket duplex event stream, an
//! SSE log stream for debug-playground sessions, and git smart-HTTP
//! under the minted clone URLs.

mod cards;
mod debug;
mod events;
mod git_http;
mod pipelines;
mod repos;
mod runs;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use laf_core::SystemClock;
use laf_engine::{Engine, EngineError};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared handler context.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine<SystemClock>>,
    pub boot_secret: Arc<String>,
}

impl AppState {
    pub fn new(engine: Arc<Engine<SystemClock>>, boot_secret: String) -> Self {
        Self {
            engine,
            boot_secret: Arc::new(boot_secret),
        }
    }
}

/// Stable JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Handler-level error with a stable status mapping.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match &e {
            EngineError::RunNotFound(_)
            | EngineError::PipelineNotFound(_)
            | EngineError::RepoNotFound(_)
            | EngineError::DebugSessionNotFound(_) => ApiError::NotFound(e.to_string()),
            EngineError::RunTerminal(_)
            | EngineError::DebugSessionExists { .. }
            | EngineError::DebugInvalidState { .. } => ApiError::Conflict(e.to_string()),
            EngineError::Graph(_) => ApiError::BadRequest(e.to_string()),
            EngineError::Git(git) => git_error_status(git, e.to_string()),
            EngineError::Storage(_) | EngineError::Registry(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<laf_storage::StorageError> for ApiError {
    fn from(e: laf_storage::StorageError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<laf_git::GitError> for ApiError {
    fn from(e: laf_git::GitError) -> Self {
        let message = e.to_string();
        git_error_status(&e, message)
    }
}

fn git_error_status(e: &laf_git::GitError, message: String) -> ApiError {
    match e {
        laf_git::GitError::RepoNotFound(_)
        | laf_git::GitError::BranchNotFound(_)
        | laf_git::GitError::PendingOpNotFound(_) => ApiError::NotFound(message),
        laf_git::GitError::UnresolvedConflict { .. } => ApiError::BadRequest(message),
        laf_git::GitError::Refused { .. } => ApiError::Conflict(message),
        _ => ApiError::Internal(message),
    }
}

/// Assemble all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // repos
        .route("/repos", get(repos::list).post(repos::create))
        .route("/repos/{id}", get(repos::show).delete(repos::destroy))
        .route("/repos/{id}/branches", get(repos::branches))
        .route("/repos/{id}/commits", get(repos::commits))
        .route("/repos/{id}/diff", get(repos::diff))
        .route("/repos/{id}/sync", post(repos::sync))
        .route("/repos/{id}/cleanup", post(repos::cleanup))
        .route("/repos/{id}/reinitialize", post(repos::reinitialize))
        .route("/repos/{id}/resolve", post(repos::resolve_conflicts))
        .route("/repos/{id}/runs", get(runs::list_for_repo))
        // cards
        .route(
            "/repos/{id}/cards",
            get(cards::list).post(cards::create),
        )
        .route("/cards/{id}", get(cards::show).delete(cards::destroy))
        .route("/cards/{id}/start", post(cards::start))
        .route("/cards/{id}/approve", post(cards::approve))
        .route("/cards/{id}/reject", post(cards::reject))
        .route("/cards/{id}/retry", post(cards::retry))
        .route("/cards/{id}/rebase", post(cards::rebase))
        .route("/cards/{id}/merge", post(cards::merge))
        // pipelines
        .route(
            "/repos/{id}/pipelines",
            get(pipelines::list).post(pipelines::create),
        )
        .route(
            "/pipelines/{id}",
            get(pipelines::show)
                .put(pipelines::update)
                .delete(pipelines::destroy),
        )
        // runs
        .route("/runs", post(runs::start))
        .route("/runs/{id}", get(runs::show))
        .route("/runs/{id}/cancel", post(runs::cancel))
        .route("/runs/{id}/steps/{index}/logs", get(runs::step_logs))
        // runners
        .route("/runners", get(runners_list))
        // debug sessions
        .route("/debug/sessions", post(debug::create))
        .route("/debug/sessions/{id}", get(debug::show))
        .route("/debug/sessions/{id}/attach", post(debug::attach))
        .route("/debug/sessions/{id}/resume", post(debug::resume))
        .route("/debug/sessions/{id}/abort", post(debug::abort))
        .route("/debug/sessions/{id}/extend", post(debug::extend))
        // event streams
        .route("/events", get(events::ws_events))
        .route("/events/stream", get(events::sse_stream))
        // git smart-HTTP under minted clone URLs
        .route("/git/{repo}/{token}/info/refs", get(git_http::info_refs))
        .route("/git/{repo}/{token}/{service}", post(git_http::service_rpc))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn runners_list(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<Vec<laf_core::Runner>> {
    Json(state.engine.runners())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
