// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Card lifecycle: CRUD plus the workflow verbs that schedule runs and
//! realize approval as a merge.

use super::repos::{load_repo, now_ms};
use super::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::Json;
use indexmap::IndexMap;
use laf_core::{
    Card, CardId, CardStatus, Event, IdGen, PipelineDefinition, PipelineId, RouteSelector,
    StepKind, StepTemplate, Trigger, TriggerKind, UuidIdGen,
};
use laf_engine::StartRunRequest;
use laf_git::{MergeResult, RebaseResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateCard {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

pub async fn create(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
    Json(body): Json<CreateCard>,
) -> Result<Json<Card>, ApiError> {
    let repo = load_repo(&state, &repo_id)?;
    let id = CardId::new(UuidIdGen.next());
    let card = Card {
        branch: format!("card/{}", id.short(8)),
        id,
        repo_id: repo.id,
        title: body.title,
        description: body.description,
        status: CardStatus::Todo,
        run_id: None,
        created_at_ms: now_ms(),
    };
    state.engine.db().insert_card(&card)?;
    publish_card(&state, &card);
    Ok(Json(card))
}

pub async fn list(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> Result<Json<Vec<Card>>, ApiError> {
    let repo = load_repo(&state, &repo_id)?;
    Ok(Json(state.engine.db().list_cards(&repo.id)?))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Card>, ApiError> {
    Ok(Json(load_card(&state, &id)?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let card = load_card(&state, &id)?;
    if card.status == CardStatus::InProgress {
        return Err(ApiError::Conflict(
            "card has a live run; cancel it first".to_string(),
        ));
    }
    state.engine.db().delete_card(&card.id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize, Default)]
pub struct StartCard {
    /// Run an existing pipeline instead of the card's ad-hoc agent step.
    #[serde(default)]
    pub pipeline_id: Option<String>,
    /// Prompt override for the ad-hoc agent step.
    #[serde(default)]
    pub prompt: Option<String>,
}

/// `start`: todo/failed → in_progress with exactly one live run.
pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StartCard>>,
) -> Result<Json<Card>, ApiError> {
    let card = load_card(&state, &id)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    start_card_run(&state, card, body).await.map(Json)
}

/// `retry`: failed → in_progress with a fresh run.
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StartCard>>,
) -> Result<Json<Card>, ApiError> {
    let card = load_card(&state, &id)?;
    if card.status != CardStatus::Failed {
        return Err(ApiError::Conflict(format!(
            "card is {}, only failed cards retry",
            card.status
        )));
    }
    let body = body.map(|Json(b)| b).unwrap_or_default();
    start_card_run(&state, card, body).await.map(Json)
}

async fn start_card_run(
    state: &AppState,
    mut card: Card,
    body: StartCard,
) -> Result<Card, ApiError> {
    if !card.status.can_move_to(CardStatus::InProgress) {
        return Err(ApiError::Conflict(format!(
            "card cannot start from {}",
            card.status
        )));
    }

    let repo = load_repo(state, card.repo_id.as_str())?;
    let handle = state.engine.git().repo(&repo.id)?;
    handle.ensure_branch(&card.branch, &repo.default_branch).await?;
    let commit_sha = handle.branch_sha(&card.branch).await?;

    let definition = match &body.pipeline_id {
        Some(pipeline_id) => state
            .engine
            .db()
            .get_pipeline(&PipelineId::new(pipeline_id.clone()))?
            .ok_or_else(|| ApiError::NotFound(format!("unknown pipeline: {pipeline_id}")))?,
        None => card_pipeline(state, &card, body.prompt.as_deref())?,
    };

    let trigger = Trigger {
        kind: TriggerKind::Card,
        actor: None,
        card_id: Some(card.id.clone()),
        branch: card.branch.clone(),
        commit_sha,
        on_pass: None,
        on_fail: None,
    };

    let run_id = state
        .engine
        .start_run(StartRunRequest {
            repo_id: repo.id.clone(),
            definition,
            trigger,
        })
        .await?;

    card.status = CardStatus::InProgress;
    card.run_id = Some(run_id);
    state.engine.db().update_card(&card)?;
    publish_card(state, &card);
    Ok(card)
}

/// The ad-hoc single-step agent pipeline a card runs when no pipeline
/// is named. Stored so restart recovery can rebuild the run.
fn card_pipeline(
    state: &AppState,
    card: &Card,
    prompt: Option<&str>,
) -> Result<PipelineDefinition, ApiError> {
    let pipeline_id = PipelineId::new(format!("card-{}", card.id));
    if let Some(existing) = state.engine.db().get_pipeline(&pipeline_id)? {
        return Ok(existing);
    }

    let prompt = prompt.unwrap_or(&card.description);
    let mut steps = IndexMap::new();
    steps.insert(
        "agent".to_string(),
        StepTemplate {
            kind: StepKind::Agent,
            config: serde_json::json!({
                "prompt": prompt,
                "title": card.title,
            }),
            selector: RouteSelector::Any,
            continue_in_context: false,
            timeout_s: None,
        },
    );
    let def = PipelineDefinition {
        id: pipeline_id,
        repo_id: card.repo_id.clone(),
        name: format!("card: {}", card.title),
        steps,
        edges: vec![laf_core::Edge {
            from: "agent".to_string(),
            to: laf_core::EdgeTarget::Stop {
                outcome: laf_core::RunOutcome::Passed,
            },
            condition: laf_core::EdgeCondition::Success,
        }],
        entry_points: vec!["agent".to_string()],
        push_trigger: None,
    };
    state.engine.db().insert_pipeline(&def, now_ms())?;
    Ok(def)
}

/// `approve`: in_review → merge feature into default → done.
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MergeResult>, ApiError> {
    let mut card = load_card(&state, &id)?;
    if card.status != CardStatus::InReview {
        return Err(ApiError::Conflict(format!(
            "card is {}, only in_review cards approve",
            card.status
        )));
    }
    let repo = load_repo(&state, card.repo_id.as_str())?;
    let result = state
        .engine
        .git()
        .merge(&repo.id, &card.branch, &repo.default_branch)
        .await?;

    if result.success {
        card.status = CardStatus::Done;
        state.engine.db().update_card(&card)?;
        publish_card(&state, &card);
    }
    Ok(Json(result))
}

/// Explicit merge, same preconditions as approve.
pub async fn merge(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MergeResult>, ApiError> {
    approve(State(state), Path(id)).await
}

/// `reject`: in_review → todo.
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Card>, ApiError> {
    let mut card = load_card(&state, &id)?;
    if !card.status.can_move_to(CardStatus::Todo) {
        return Err(ApiError::Conflict(format!(
            "card cannot be rejected from {}",
            card.status
        )));
    }
    card.status = CardStatus::Todo;
    state.engine.db().update_card(&card)?;
    publish_card(&state, &card);
    Ok(Json(card))
}

/// Rebase the card's feature branch onto the repo default branch.
pub async fn rebase(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RebaseResult>, ApiError> {
    let card = load_card(&state, &id)?;
    let repo = load_repo(&state, card.repo_id.as_str())?;
    let result = state
        .engine
        .git()
        .rebase(&repo.id, &card.branch, &repo.default_branch)
        .await?;
    Ok(Json(result))
}

fn load_card(state: &AppState, id: &str) -> Result<Card, ApiError> {
    state
        .engine
        .db()
        .get_card(&CardId::new(id))?
        .ok_or_else(|| ApiError::NotFound(format!("unknown card: {id}")))
}

fn publish_card(state: &AppState, card: &Card) {
    state.engine.bus().publish(Event::CardStatusChanged {
        repo_id: card.repo_id.clone(),
        card_id: card.id.clone(),
        status: card.status,
    });
}

#[cfg(test)]
#[path = "cards_tests.rs"]
mod tests;
