// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::graph::{
    Edge, EdgeCondition, EdgeTarget, PipelineDefinition, PipelineId, StepTemplate,
};
use crate::run::{PipelineRun, RepoId, RunId, RunState, Trigger};
use crate::runner::RunnerHello;
use crate::step::{RouteSelector, Step, StepId, StepKind, StepState};
use indexmap::IndexMap;
use std::collections::HashMap;

// ── Entity factory functions ────────────────────────────────────────────────

pub fn runner_hello(name: &str, runner_type: &str) -> RunnerHello {
    RunnerHello {
        runner_id: None,
        name: name.to_string(),
        runner_type: runner_type.to_string(),
        labels: HashMap::new(),
    }
}

pub fn runner_hello_with_id(id: &str, name: &str, runner_type: &str) -> RunnerHello {
    RunnerHello {
        runner_id: Some(id.to_string()),
        name: name.to_string(),
        runner_type: runner_type.to_string(),
        labels: HashMap::new(),
    }
}

pub fn shell_template(command: &str) -> StepTemplate {
    StepTemplate {
        kind: StepKind::Shell,
        config: serde_json::json!({ "command": command }),
        selector: RouteSelector::Any,
        continue_in_context: false,
        timeout_s: None,
    }
}

/// Linear pipeline: each step's success edge leads to the next, the
/// last step's success edge stops the run as passed. Failure anywhere
/// terminates the run via the default failure routing.
pub fn linear_pipeline(repo_id: &str, names: &[&str]) -> PipelineDefinition {
    let mut steps = IndexMap::new();
    let mut edges = Vec::new();
    for (i, name) in names.iter().enumerate() {
        steps.insert(name.to_string(), shell_template("true"));
        let to = match names.get(i + 1) {
            Some(next) => EdgeTarget::Step {
                step: next.to_string(),
            },
            None => EdgeTarget::Stop {
                outcome: crate::graph::RunOutcome::Passed,
            },
        };
        edges.push(Edge {
            from: name.to_string(),
            to,
            condition: EdgeCondition::Success,
        });
    }
    PipelineDefinition {
        id: PipelineId::new("pl-test"),
        repo_id: RepoId::new(repo_id),
        name: "test-pipeline".to_string(),
        steps,
        edges,
        entry_points: names.first().map(|n| vec![n.to_string()]).unwrap_or_default(),
        push_trigger: None,
    }
}

pub fn pending_step(run_id: &str, index: u32, name: &str) -> Step {
    Step {
        id: StepId::new(format!("{run_id}-s{index}")),
        run_id: RunId::new(run_id),
        index,
        name: name.to_string(),
        kind: StepKind::Shell,
        config: serde_json::json!({ "command": "true" }),
        selector: RouteSelector::Any,
        state: StepState::Pending,
        exit_code: None,
        error: None,
        assigned_runner: None,
        started_at_ms: None,
        finished_at_ms: None,
        continue_in_context: false,
        timeout_s: 300,
        assign_attempts: 0,
        log_tail: Vec::new(),
    }
}

pub fn running_run(id: &str, repo_id: &str, steps: Vec<Step>) -> PipelineRun {
    PipelineRun {
        id: RunId::new(id),
        pipeline_id: None,
        repo_id: RepoId::new(repo_id),
        state: RunState::Running,
        trigger: Trigger::manual("main", "0000000000000000000000000000000000000000"),
        steps_total: steps.len() as u32,
        steps_completed: 0,
        current_index: 0,
        created_at_ms: 1_000_000,
        finished_at_ms: None,
        error: None,
        working_branch: "main".to_string(),
        crashed: false,
        steps,
    }
}
