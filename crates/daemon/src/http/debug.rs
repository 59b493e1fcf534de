// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debug session lifecycle verbs.

use super::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::Json;
use laf_core::{DebugSession, DebugSessionId, RunId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
pub struct CreateSession {
    pub run_id: String,
    #[serde(default)]
    pub breakpoints: BTreeSet<u32>,
}

/// The create response is the only place the token is revealed.
#[derive(Debug, Serialize)]
pub struct CreatedSession {
    #[serde(flatten)]
    pub session: DebugSession,
}

/// Token-free projection for reads.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: DebugSessionId,
    pub run_id: RunId,
    pub state: laf_core::DebugState,
    pub expires_at_ms: u64,
    pub breakpoints: BTreeSet<u32>,
    pub paused_step: Option<u32>,
}

impl From<DebugSession> for SessionView {
    fn from(s: DebugSession) -> Self {
        Self {
            id: s.id,
            run_id: s.run_id,
            state: s.state,
            expires_at_ms: s.expires_at_ms,
            breakpoints: s.breakpoints,
            paused_step: s.paused_step,
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSession>,
) -> Result<Json<CreatedSession>, ApiError> {
    let run_id = RunId::new(body.run_id);
    if state.engine.db().get_run(&run_id)?.is_none() {
        return Err(ApiError::NotFound(format!("unknown run: {run_id}")));
    }
    let session = state
        .engine
        .debug_sessions()
        .create(run_id, body.breakpoints)?;
    Ok(Json(CreatedSession { session }))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .engine
        .debug_sessions()
        .get(&DebugSessionId::new(id))?;
    Ok(Json(session.into()))
}

#[derive(Debug, Deserialize)]
pub struct AttachBody {
    pub token: String,
}

pub async fn attach(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AttachBody>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .engine
        .debug_sessions()
        .attach(&DebugSessionId::new(id), &body.token)?;
    Ok(Json(session.into()))
}

pub async fn resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .engine
        .debug_sessions()
        .resume(&DebugSessionId::new(id))
        .await?;
    Ok(Json(session.into()))
}

pub async fn abort(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .engine
        .debug_sessions()
        .abort(&DebugSessionId::new(id))
        .await?;
    Ok(Json(session.into()))
}

pub async fn extend(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .engine
        .debug_sessions()
        .extend(&DebugSessionId::new(id))?;
    Ok(Json(session.into()))
}
