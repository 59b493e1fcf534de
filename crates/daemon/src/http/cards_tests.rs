// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::http::repos;
use axum::extract::{Path, State};
use laf_bus::EventBus;
use laf_core::{Config, RepoId, RunState, SystemClock};
use laf_engine::{Engine, EngineDeps};
use laf_git::GitStore;
use laf_storage::{Database, LogStore};
use std::sync::Arc;
use tempfile::TempDir;

async fn fixture() -> (TempDir, AppState, RepoId) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(EngineDeps {
        config: Config::default(),
        clock: SystemClock,
        db: Arc::new(Database::open_in_memory().unwrap()),
        logs: Arc::new(LogStore::new(dir.path().join("logs"))),
        git: Arc::new(GitStore::new(dir.path().join("repos"))),
        bus: Arc::new(EventBus::new(256, 4096)),
        http_base: "http://127.0.0.1:7780".to_string(),
    });
    let state = AppState::new(engine, "boot-secret".to_string());

    let Json(repo) = repos::create(
        State(state.clone()),
        Json(repos::CreateRepo {
            name: "one".to_string(),
            default_branch: "main".to_string(),
        }),
    )
    .await
    .unwrap();
    let repo_id = repo.repo.id.clone();
    (dir, state, repo_id)
}

async fn make_card(state: &AppState, repo_id: &RepoId) -> Card {
    let Json(card) = create(
        State(state.clone()),
        Path(repo_id.to_string()),
        Json(CreateCard {
            title: "Fix login".to_string(),
            description: "Users cannot log in".to_string(),
        }),
    )
    .await
    .unwrap();
    card
}

#[tokio::test]
async fn create_allocates_feature_branch_and_todo_status() {
    let (_dir, state, repo_id) = fixture().await;
    let card = make_card(&state, &repo_id).await;

    assert_eq!(card.status, CardStatus::Todo);
    assert!(card.branch.starts_with("card/"));
    assert!(card.run_id.is_none());

    let listed = list(State(state.clone()), Path(repo_id.to_string()))
        .await
        .unwrap();
    assert_eq!(listed.0.len(), 1);
}

#[tokio::test]
async fn start_schedules_one_live_run_and_stores_adhoc_pipeline() {
    let (_dir, state, repo_id) = fixture().await;
    let card = make_card(&state, &repo_id).await;

    let Json(started) = start(
        State(state.clone()),
        Path(card.id.to_string()),
        None,
    )
    .await
    .unwrap();

    assert_eq!(started.status, CardStatus::InProgress);
    let run_id = started.run_id.clone().unwrap();
    let run = state.engine.db().get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Running);
    assert_eq!(run.trigger.card_id, Some(card.id.clone()));
    assert_eq!(run.working_branch, card.branch);

    // The ad-hoc definition is persisted for restart recovery.
    let def = state
        .engine
        .db()
        .get_pipeline(&PipelineId::new(format!("card-{}", card.id)))
        .unwrap()
        .unwrap();
    assert_eq!(def.steps.len(), 1);

    // A second start is rejected while the run is live.
    let again = start(State(state.clone()), Path(card.id.to_string()), None).await;
    assert!(again.is_err());
}

#[tokio::test]
async fn approve_merges_feature_branch_and_completes_card() {
    let (_dir, state, repo_id) = fixture().await;
    let mut card = make_card(&state, &repo_id).await;

    // Put work on the feature branch, then review it.
    let handle = state.engine.git().repo(&repo_id).unwrap();
    handle.ensure_branch(&card.branch, "main").await.unwrap();
    // Seed a commit so the merge moves main.
    let run = laf_core::RunId::new("seed");
    let lease = handle.lease_worktree(&card.branch, &run, 0).await.unwrap();
    std::fs::write(lease.path.join("fix.txt"), "fixed\n").unwrap();
    let sha = {
        let run_git = |args: &[&str]| {
            let out = std::process::Command::new("git")
                .args(args)
                .current_dir(&lease.path)
                .env("GIT_AUTHOR_NAME", "t")
                .env("GIT_AUTHOR_EMAIL", "t@localhost")
                .env("GIT_COMMITTER_NAME", "t")
                .env("GIT_COMMITTER_EMAIL", "t@localhost")
                .output()
                .unwrap();
            assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
            String::from_utf8_lossy(&out.stdout).trim().to_string()
        };
        run_git(&["add", "-A"]);
        run_git(&["commit", "-m", "fix"]);
        run_git(&["rev-parse", "HEAD"])
    };
    let out = std::process::Command::new("git")
        .args(["update-ref", &format!("refs/heads/{}", card.branch), &sha])
        .current_dir(&handle.bare_dir)
        .output()
        .unwrap();
    assert!(out.status.success());
    handle.release_worktree(lease, false).await;

    card.status = CardStatus::InReview;
    state.engine.db().update_card(&card).unwrap();

    let Json(result) = approve(State(state.clone()), Path(card.id.to_string()))
        .await
        .unwrap();
    assert!(result.success);

    let done = state.engine.db().get_card(&card.id).unwrap().unwrap();
    assert_eq!(done.status, CardStatus::Done);

    // The fix landed on main.
    let main_tip = handle.branch_sha("main").await.unwrap();
    assert_eq!(main_tip, sha, "fast-forward merge moves main to the fix");
}

#[tokio::test]
async fn approve_requires_review_status() {
    let (_dir, state, repo_id) = fixture().await;
    let card = make_card(&state, &repo_id).await;

    let err = approve(State(state.clone()), Path(card.id.to_string())).await;
    assert!(err.is_err(), "todo cards cannot be approved");
}

#[tokio::test]
async fn reject_returns_card_to_todo() {
    let (_dir, state, repo_id) = fixture().await;
    let mut card = make_card(&state, &repo_id).await;
    card.status = CardStatus::InReview;
    state.engine.db().update_card(&card).unwrap();

    let Json(rejected) = reject(State(state.clone()), Path(card.id.to_string()))
        .await
        .unwrap();
    assert_eq!(rejected.status, CardStatus::Todo);
}

#[tokio::test]
async fn retry_requires_failed_status() {
    let (_dir, state, repo_id) = fixture().await;
    let card = make_card(&state, &repo_id).await;

    assert!(retry(State(state.clone()), Path(card.id.to_string()), None)
        .await
        .is_err());

    let mut failed = card.clone();
    failed.status = CardStatus::Failed;
    state.engine.db().update_card(&failed).unwrap();

    let Json(retried) = retry(State(state.clone()), Path(card.id.to_string()), None)
        .await
        .unwrap();
    assert_eq!(retried.status, CardStatus::InProgress);
    assert!(retried.run_id.is_some());
}

#[tokio::test]
async fn rebase_fast_forwards_behind_feature_branch() {
    let (_dir, state, repo_id) = fixture().await;
    let card = make_card(&state, &repo_id).await;
    let handle = state.engine.git().repo(&repo_id).unwrap();
    handle.ensure_branch(&card.branch, "main").await.unwrap();

    let Json(result) = rebase(State(state.clone()), Path(card.id.to_string()))
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.fast_forward);
}
