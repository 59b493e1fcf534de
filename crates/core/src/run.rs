// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline-run identity and state.

use crate::card::CardId;
use crate::graph::PipelineId;
use crate::step::Step;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a pipeline run.
    #[derive(Default)]
    pub struct RunId;
}

crate::define_id! {
    /// Unique identifier for a repository managed by the control plane.
    #[derive(Default)]
    pub struct RepoId;
}

/// State of a pipeline run.
///
/// A run is terminal exactly when every reachable step is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Passed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Passed => write!(f, "passed"),
            RunState::Failed => write!(f, "failed"),
            RunState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Explicit request from the UI collaborator
    Manual,
    /// Card transitioning to `in_progress`
    Card,
    /// Git push to a branch matching a trigger predicate
    Push,
}

/// Action taken at run termination on behalf of the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RunHook {
    /// Merge `source` into `target` (card approval realizes this as
    /// feature-branch → default-branch).
    Merge { source: String, target: String },
}

/// Trigger metadata carried by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// Who or what started the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<CardId>,
    pub branch: String,
    pub commit_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_pass: Option<RunHook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<RunHook>,
}

impl Trigger {
    /// Manual trigger on a branch tip, no termination hooks.
    pub fn manual(branch: impl Into<String>, commit_sha: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            actor: None,
            card_id: None,
            branch: branch.into(),
            commit_sha: commit_sha.into(),
            on_pass: None,
            on_fail: None,
        }
    }
}

/// An instance of executing a pipeline definition.
///
/// The run exclusively owns its step records; its card (if any) holds
/// only the run id for lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<PipelineId>,
    pub repo_id: RepoId,
    pub state: RunState,
    pub trigger: Trigger,
    pub steps_total: u32,
    pub steps_completed: u32,
    /// Index of the most recently dispatched step.
    #[serde(default)]
    pub current_index: u32,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Branch the run's steps execute against (feature branch for card
    /// runs, the pushed branch for push runs).
    pub working_branch: String,
    /// Set when a catastrophic fault was persisted for this run; the
    /// executor refuses to dispatch further steps until cleared.
    #[serde(default)]
    pub crashed: bool,
    /// Ordered step records owned by this run.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl PipelineRun {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Look up an owned step by id.
    pub fn step(&self, id: &crate::step::StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn step_mut(&mut self, id: &crate::step::StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// All steps are terminal (vacuously true for zero steps).
    pub fn all_steps_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.is_terminal())
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
