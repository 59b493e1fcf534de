// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Card work items.

use crate::run::{RepoId, RunId};
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a card.
    #[derive(Default)]
    pub struct CardId;
}

/// Workflow status of a card.
///
/// A card in `in_progress` has exactly one live run; `in_review`
/// requires that run to have terminated successfully; `done` requires
/// a successful merge of the feature branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Todo,
    InProgress,
    InReview,
    Done,
    Failed,
}

impl CardStatus {
    /// Whether the workflow permits moving to `next`.
    pub fn can_move_to(&self, next: CardStatus) -> bool {
        use CardStatus::*;
        match (self, next) {
            (Todo, InProgress) => true,
            (InProgress, InReview) | (InProgress, Failed) => true,
            (InReview, Done) | (InReview, InProgress) | (InReview, Todo) => true,
            // retry after failure re-enters the workflow
            (Failed, InProgress) | (Failed, Todo) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardStatus::Todo => write!(f, "todo"),
            CardStatus::InProgress => write!(f, "in_progress"),
            CardStatus::InReview => write!(f, "in_review"),
            CardStatus::Done => write!(f, "done"),
            CardStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A schedulable work item backed by a feature branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub repo_id: RepoId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: CardStatus,
    /// Feature branch the card's work lands on.
    pub branch: String,
    /// Latest run associated with this card (weak: lookup only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub created_at_ms: u64,
}

#[cfg(test)]
#[path = "card_tests.rs"]
mod tests;
