// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step identity and state machine.

use crate::run::RunId;
use crate::runner::RunnerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

crate::define_id! {
    /// Unique identifier for a step instance within a pipeline run.
    #[derive(Default)]
    pub struct StepId;
}

/// Declared kind of a step.
///
/// The dispatcher treats all runner-bound kinds identically; only the
/// runner-side agent interprets the kind. Git actions are never
/// dispatched — the git substrate executes them inline and the result
/// is injected into the executor mailbox as a synthesized step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Shell script executed by a runner
    Shell,
    /// Container image executed by a runner
    Container,
    /// AI coding agent driven by a runner
    Agent,
    /// Merge/rebase action executed inline by the git substrate
    GitAction,
}

impl StepKind {
    /// True when the step is handed to a remote runner.
    pub fn is_dispatched(&self) -> bool {
        !matches!(self, StepKind::GitAction)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Shell => write!(f, "shell"),
            StepKind::Container => write!(f, "container"),
            StepKind::Agent => write!(f, "agent"),
            StepKind::GitAction => write!(f, "git_action"),
        }
    }
}

/// Which runners are eligible to execute a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteSelector {
    /// Any runner
    #[default]
    Any,
    /// Runners whose `runner_type` equals the tag
    RunnerType(String),
    /// Runners whose labels contain every requested key/value pair
    Labels(HashMap<String, String>),
}

impl RouteSelector {
    pub fn is_any(&self) -> bool {
        matches!(self, RouteSelector::Any)
    }
}

/// State of a step.
///
/// ```text
/// pending → ready → dispatched → acked → completing → {completed, failed, cancelled}
///             ↑          ↓
///             └── assign timeout (rollback)
/// ```
///
/// `ready` means all inbound edges with satisfied conditions have
/// fired. `completing` orders the durable log flush ahead of the
/// terminal status broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Ready,
    Dispatched,
    Acked,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Failed | StepState::Cancelled
        )
    }

    /// Whether the state graph permits advancing to `next`.
    pub fn can_advance_to(&self, next: StepState) -> bool {
        use StepState::*;
        match (self, next) {
            (Pending, Ready) => true,
            (Ready, Dispatched) => true,
            // assign-timeout rollback
            (Dispatched, Ready) => true,
            (Dispatched, Acked) => true,
            (Acked, Completing) => true,
            (Completing, Completed) | (Completing, Failed) | (Completing, Cancelled) => true,
            // failure without ever reaching a runner (assign exhausted,
            // runner death between dispatch and ack, inline git action)
            (Ready, Completing) | (Dispatched, Completing) => true,
            // cancellation short-circuits non-busy states
            (Pending, Cancelled) | (Ready, Cancelled) | (Dispatched, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Pending => write!(f, "pending"),
            StepState::Ready => write!(f, "ready"),
            StepState::Dispatched => write!(f, "dispatched"),
            StepState::Acked => write!(f, "acked"),
            StepState::Completing => write!(f, "completing"),
            StepState::Completed => write!(f, "completed"),
            StepState::Failed => write!(f, "failed"),
            StepState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work within a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub run_id: RunId,
    /// Logical index within the pipeline (creation order).
    pub index: u32,
    /// Template name from the pipeline definition.
    pub name: String,
    pub kind: StepKind,
    /// Opaque configuration payload interpreted by the runner agent
    /// (or by the git substrate for git actions).
    pub config: serde_json::Value,
    #[serde(default)]
    pub selector: RouteSelector,
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Weak reference to the runner executing this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_runner: Option<RunnerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    /// Preserve this step's worktree as the starting state of the next
    /// sequentially-dispatched step, and feed its final log tail to any
    /// AI-typed successor as "previous output".
    #[serde(default)]
    pub continue_in_context: bool,
    /// Wall-clock timeout in seconds.
    pub timeout_s: u64,
    /// Advisory count of assign attempts that timed out without an ack.
    #[serde(default)]
    pub assign_attempts: u32,
    /// Last captured log lines, retained on failure for operators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_tail: Vec<String>,
}

/// Error raised on an illegal step state transition.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("illegal step transition {from} → {to} for step {step}")]
pub struct IllegalTransition {
    pub step: StepId,
    pub from: StepState,
    pub to: StepState,
}

impl Step {
    /// Advance the state machine, enforcing the legal transition graph.
    pub fn advance(&mut self, next: StepState) -> Result<(), IllegalTransition> {
        if !self.state.can_advance_to(next) {
            return Err(IllegalTransition {
                step: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
