// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git smart-HTTP under the minted clone URLs.
//!
//! `GET  /git/:repo/:token/info/refs?service=git-{upload,receive}-pack`
//! `POST /git/:repo/:token/git-{upload,receive}-pack`
//!
//! Pushes (receive-pack) publish `repo:branch_updated` events for every
//! moved ref and start runs for pipelines whose push trigger matches.

use super::repos::load_repo;
use super::{ApiError, AppState};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use laf_core::{Event, Repo, Trigger, TriggerKind};
use laf_engine::StartRunRequest;
use laf_git::smart::SmartService;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct InfoRefsQuery {
    pub service: String,
}

pub async fn info_refs(
    State(state): State<AppState>,
    Path((repo_id, token)): Path<(String, String)>,
    Query(query): Query<InfoRefsQuery>,
) -> Result<Response, ApiError> {
    let repo = authorize(&state, &repo_id, &token)?;
    let service = SmartService::from_name(&query.service)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown service: {}", query.service)))?;

    let handle = state.engine.git().repo(&repo.id)?;
    let body = handle.advertise_refs(service).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        content_type(&service.advertisement_content_type()),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok((StatusCode::OK, headers, body).into_response())
}

pub async fn service_rpc(
    State(state): State<AppState>,
    Path((repo_id, token, service_name)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let repo = authorize(&state, &repo_id, &token)?;
    let service = SmartService::from_name(&service_name)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown service: {service_name}")))?;

    let handle = state.engine.git().repo(&repo.id)?;

    // Snapshot refs around a push so moved branches can be announced
    // and trigger pipelines.
    let before = if service == SmartService::ReceivePack {
        branch_tips(&state, &repo).await
    } else {
        HashMap::new()
    };

    let output = handle.service_rpc(service, &body).await?;

    if service == SmartService::ReceivePack {
        let after = branch_tips(&state, &repo).await;
        on_push(&state, &repo, &before, &after).await;
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        content_type(&service.result_content_type()),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok((StatusCode::OK, headers, output).into_response())
}

fn authorize(state: &AppState, repo_id: &str, token: &str) -> Result<Repo, ApiError> {
    let repo = load_repo(state, repo_id)?;
    if repo.clone_token != token {
        return Err(ApiError::NotFound("unknown repo".to_string()));
    }
    Ok(repo)
}

fn content_type(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

async fn branch_tips(state: &AppState, repo: &Repo) -> HashMap<String, String> {
    match state.engine.git().repo(&repo.id) {
        Ok(handle) => match handle.branches(false).await {
            Ok(branches) => branches
                .into_iter()
                .map(|b| (b.name, b.commit_sha))
                .collect(),
            Err(_) => HashMap::new(),
        },
        Err(_) => HashMap::new(),
    }
}

/// Announce moved refs and start push-triggered pipelines.
async fn on_push(
    state: &AppState,
    repo: &Repo,
    before: &HashMap<String, String>,
    after: &HashMap<String, String>,
) {
    for (branch, sha) in after {
        if before.get(branch) == Some(sha) {
            continue;
        }
        info!(repo = %repo.id, branch = %branch, sha = %sha, "branch updated by push");
        state.engine.bus().publish(Event::BranchUpdated {
            repo_id: repo.id.clone(),
            branch: branch.clone(),
            commit_sha: sha.clone(),
        });

        let pipelines = match state.engine.db().list_pipelines(&repo.id) {
            Ok(pipelines) => pipelines,
            Err(e) => {
                warn!(repo = %repo.id, error = %e, "failed to list pipelines for push trigger");
                continue;
            }
        };
        for definition in pipelines {
            if !definition.push_matches(branch) {
                continue;
            }
            info!(
                repo = %repo.id,
                pipeline = %definition.id,
                branch = %branch,
                "push trigger matched"
            );
            let trigger = Trigger {
                kind: TriggerKind::Push,
                actor: None,
                card_id: None,
                branch: branch.clone(),
                commit_sha: sha.clone(),
                on_pass: None,
                on_fail: None,
            };
            let request = StartRunRequest {
                repo_id: repo.id.clone(),
                definition,
                trigger,
            };
            if let Err(e) = state.engine.start_run(request).await {
                warn!(repo = %repo.id, error = %e, "push-triggered run failed to start");
            }
        }
    }
}
