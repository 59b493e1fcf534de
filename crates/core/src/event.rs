// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types fanned out to observers.
//!
//! Every event belongs to exactly one topic; within a topic the bus
//! stamps a monotonic sequence and delivers in order. Events serialize
//! with `{"type": "entity:kind", ...fields}` format; unknown type tags
//! deserialize to `Custom`.

use crate::card::{CardId, CardStatus};
use crate::debug::{DebugSessionId, DebugState};
use crate::run::{RepoId, RunId, RunState};
use crate::runner::{RunnerId, RunnerState};
use crate::step::{StepId, StepState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of entity a topic is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    Repo,
    Run,
    Step,
    Runner,
    Debug,
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicKind::Repo => write!(f, "repo"),
            TopicKind::Run => write!(f, "run"),
            TopicKind::Step => write!(f, "step"),
            TopicKind::Runner => write!(f, "runner"),
            TopicKind::Debug => write!(f, "debug"),
        }
    }
}

/// A named stream on the event bus, scoped to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub kind: TopicKind,
    pub id: String,
}

impl Topic {
    pub fn run(id: &RunId) -> Self {
        Self {
            kind: TopicKind::Run,
            id: id.to_string(),
        }
    }

    pub fn step(id: &StepId) -> Self {
        Self {
            kind: TopicKind::Step,
            id: id.to_string(),
        }
    }

    pub fn runner(id: &RunnerId) -> Self {
        Self {
            kind: TopicKind::Runner,
            id: id.to_string(),
        }
    }

    pub fn repo(id: &RepoId) -> Self {
        Self {
            kind: TopicKind::Repo,
            id: id.to_string(),
        }
    }

    pub fn debug(id: &DebugSessionId) -> Self {
        Self {
            kind: TopicKind::Debug,
            id: id.to_string(),
        }
    }

    /// Parse `"run:abc"`-style topic names.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once(':')?;
        let kind = match kind {
            "repo" => TopicKind::Repo,
            "run" => TopicKind::Run,
            "step" => TopicKind::Step,
            "runner" => TopicKind::Runner,
            "debug" => TopicKind::Debug,
            _ => return None,
        };
        if id.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            id: id.to_string(),
        })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Delivery class of an event.
///
/// State events are lossless per subscriber (overflow disconnects the
/// subscriber); log events degrade to lossy delivery with a synthetic
/// `lines_dropped` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    State,
    Log,
}

/// State transitions and log batches observed by UI sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- runner --
    #[serde(rename = "runner:registered")]
    RunnerRegistered {
        id: RunnerId,
        name: String,
        runner_type: String,
        #[serde(default)]
        labels: HashMap<String, String>,
    },

    #[serde(rename = "runner:status")]
    RunnerStatus {
        id: RunnerId,
        state: RunnerState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<StepId>,
    },

    #[serde(rename = "runner:evicted")]
    RunnerEvicted { id: RunnerId },

    // -- run --
    #[serde(rename = "run:created")]
    RunCreated {
        id: RunId,
        repo_id: RepoId,
        branch: String,
        commit_sha: String,
        steps_total: u32,
    },

    #[serde(rename = "run:status")]
    RunStatus {
        id: RunId,
        state: RunState,
        steps_completed: u32,
        steps_total: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- step --
    #[serde(rename = "step:status")]
    StepStatus {
        run_id: RunId,
        step_id: StepId,
        index: u32,
        state: StepState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Batched log lines from the executing runner.
    #[serde(rename = "step:logs")]
    StepLogs { step_id: StepId, lines: Vec<String> },

    /// Synthetic marker inserted when a subscriber's log queue
    /// overflowed and delivery resumed.
    #[serde(rename = "step:lines_dropped")]
    LinesDropped { step_id: StepId, count: u64 },

    // -- repo --
    #[serde(rename = "repo:card_status")]
    CardStatusChanged {
        repo_id: RepoId,
        card_id: CardId,
        status: CardStatus,
    },

    #[serde(rename = "repo:branch_updated")]
    BranchUpdated {
        repo_id: RepoId,
        branch: String,
        commit_sha: String,
    },

    // -- debug --
    #[serde(rename = "debug:status")]
    DebugStatus {
        session_id: DebugSessionId,
        state: DebugState,
    },

    #[serde(rename = "debug:breakpoint")]
    DebugBreakpoint {
        session_id: DebugSessionId,
        step_index: u32,
        workspace_handle: String,
    },

    /// Catch-all for unknown event types (extensibility)
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::RunnerRegistered { .. } => "runner:registered",
            Event::RunnerStatus { .. } => "runner:status",
            Event::RunnerEvicted { .. } => "runner:evicted",
            Event::RunCreated { .. } => "run:created",
            Event::RunStatus { .. } => "run:status",
            Event::StepStatus { .. } => "step:status",
            Event::StepLogs { .. } => "step:logs",
            Event::LinesDropped { .. } => "step:lines_dropped",
            Event::CardStatusChanged { .. } => "repo:card_status",
            Event::BranchUpdated { .. } => "repo:branch_updated",
            Event::DebugStatus { .. } => "debug:status",
            Event::DebugBreakpoint { .. } => "debug:breakpoint",
            Event::Custom => "custom",
        }
    }

    /// The topic this event belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            Event::RunnerRegistered { id, .. }
            | Event::RunnerStatus { id, .. }
            | Event::RunnerEvicted { id } => Topic::runner(id),
            Event::RunCreated { id, .. } | Event::RunStatus { id, .. } => Topic::run(id),
            // Step transitions ride the run topic: the executor's
            // in-order commit sequence is observable there. Step
            // topics carry the log stream.
            Event::StepStatus { run_id, .. } => Topic::run(run_id),
            Event::StepLogs { step_id, .. } | Event::LinesDropped { step_id, .. } => {
                Topic::step(step_id)
            }
            Event::CardStatusChanged { repo_id, .. } | Event::BranchUpdated { repo_id, .. } => {
                Topic::repo(repo_id)
            }
            Event::DebugStatus { session_id, .. } | Event::DebugBreakpoint { session_id, .. } => {
                Topic::debug(session_id)
            }
            Event::Custom => Topic {
                kind: TopicKind::Run,
                id: String::new(),
            },
        }
    }

    /// Lossless state event or lossy log event.
    pub fn class(&self) -> EventClass {
        match self {
            Event::StepLogs { .. } | Event::LinesDropped { .. } => EventClass::Log,
            _ => EventClass::State,
        }
    }

    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::RunnerRegistered { id, runner_type, .. } => {
                format!("{t} id={id} type={runner_type}")
            }
            Event::RunnerStatus { id, state, step_id } => match step_id {
                Some(step) => format!("{t} id={id} state={state} step={step}"),
                None => format!("{t} id={id} state={state}"),
            },
            Event::RunnerEvicted { id } => format!("{t} id={id}"),
            Event::RunCreated {
                id, steps_total, ..
            } => format!("{t} id={id} steps={steps_total}"),
            Event::RunStatus {
                id,
                state,
                steps_completed,
                steps_total,
                ..
            } => format!("{t} id={id} state={state} steps={steps_completed}/{steps_total}"),
            Event::StepStatus {
                run_id,
                step_id,
                state,
                ..
            } => format!("{t} run={run_id} step={step_id} state={state}"),
            Event::StepLogs { step_id, lines } => {
                format!("{t} step={step_id} lines={}", lines.len())
            }
            Event::LinesDropped { step_id, count } => {
                format!("{t} step={step_id} count={count}")
            }
            Event::CardStatusChanged {
                card_id, status, ..
            } => format!("{t} card={card_id} status={status}"),
            Event::BranchUpdated { branch, .. } => format!("{t} branch={branch}"),
            Event::DebugStatus { session_id, state } => {
                format!("{t} session={session_id} state={state}")
            }
            Event::DebugBreakpoint {
                session_id,
                step_index,
                ..
            } => format!("{t} session={session_id} step_index={step_index}"),
            Event::Custom => t.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
