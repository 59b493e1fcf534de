// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    start = { CardStatus::Todo, CardStatus::InProgress, true },
    pass_review = { CardStatus::InProgress, CardStatus::InReview, true },
    fail_run = { CardStatus::InProgress, CardStatus::Failed, true },
    approve = { CardStatus::InReview, CardStatus::Done, true },
    reject_to_progress = { CardStatus::InReview, CardStatus::InProgress, true },
    reject_to_todo = { CardStatus::InReview, CardStatus::Todo, true },
    retry = { CardStatus::Failed, CardStatus::InProgress, true },
    skip_review = { CardStatus::InProgress, CardStatus::Done, false },
    done_is_final = { CardStatus::Done, CardStatus::InProgress, false },
    todo_to_review = { CardStatus::Todo, CardStatus::InReview, false },
)]
fn workflow_transitions(from: CardStatus, to: CardStatus, legal: bool) {
    assert_eq!(from.can_move_to(to), legal);
}

#[test]
fn card_roundtrips_serde() {
    let card = Card {
        id: CardId::new("card-1"),
        repo_id: RepoId::new("repo-1"),
        title: "Fix login".to_string(),
        description: "Users cannot log in".to_string(),
        status: CardStatus::InProgress,
        branch: "card/card-1".to_string(),
        run_id: Some(RunId::new("run-1")),
        created_at_ms: 1_000,
    };
    let json = serde_json::to_string(&card).unwrap();
    let back: Card = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, card.id);
    assert_eq!(back.status, CardStatus::InProgress);
    assert_eq!(back.run_id, Some(RunId::new("run-1")));
}

#[test]
fn status_display_is_snake_case() {
    assert_eq!(CardStatus::InProgress.to_string(), "in_progress");
    assert_eq!(CardStatus::InReview.to_string(), "in_review");
}
