// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline definitions: a directed acyclic graph of step templates
//! with conditional edges and terminal-action leaves.

use crate::run::RepoId;
use crate::step::{RouteSelector, StepKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

crate::define_id! {
    /// Unique identifier for a pipeline definition.
    #[derive(Default)]
    pub struct PipelineId;
}

/// Condition under which an edge fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    Success,
    Failure,
    Always,
}

impl EdgeCondition {
    /// Whether the edge fires given the source step succeeded.
    pub fn fires(&self, source_succeeded: bool) -> bool {
        match self {
            EdgeCondition::Success => source_succeeded,
            EdgeCondition::Failure => !source_succeeded,
            EdgeCondition::Always => true,
        }
    }
}

/// Outcome named by a `stop` terminal action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed,
}

/// Where an edge leads: another step, or a terminal action leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum EdgeTarget {
    /// Advance to the named step template.
    Step { step: String },
    /// Terminate the run with the given outcome.
    Stop { outcome: RunOutcome },
    /// Merge the run's working branch into `branch`; the run outcome
    /// is contingent on merge success.
    Merge { branch: String },
}

impl EdgeTarget {
    pub fn is_terminal_action(&self) -> bool {
        !matches!(self, EdgeTarget::Step { .. })
    }
}

/// A routed edge in the pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    #[serde(flatten)]
    pub to: EdgeTarget,
    pub condition: EdgeCondition,
}

/// Template from which step records are materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub kind: StepKind,
    /// Opaque configuration handed to the runner (or git substrate).
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub selector: RouteSelector,
    #[serde(default)]
    pub continue_in_context: bool,
    /// Wall-clock timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u64>,
}

/// Validation errors for pipeline graphs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("pipeline has no entry points")]
    NoEntryPoints,
    #[error("unknown step referenced: {0}")]
    UnknownStep(String),
    #[error("cycle detected through step: {0}")]
    Cycle(String),
    #[error("step not reachable from any entry point: {0}")]
    Unreachable(String),
    #[error("duplicate edge from {from} with condition {condition:?}")]
    DuplicateEdge {
        from: String,
        condition: EdgeCondition,
    },
}

/// A directed graph of step templates.
///
/// Invariants enforced by [`PipelineDefinition::validate`]: no cycles,
/// every non-entry node reachable from some entry, terminal actions
/// appear only as leaf-edge targets (guaranteed structurally: terminal
/// actions are edge targets and never sources).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: PipelineId,
    pub repo_id: RepoId,
    pub name: String,
    /// Step templates in declaration order.
    pub steps: IndexMap<String, StepTemplate>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Steps that become ready as soon as the run starts.
    pub entry_points: Vec<String>,
    /// Branch predicate that starts this pipeline on push: an exact
    /// branch name, or a prefix ending in `*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_trigger: Option<String>,
}

impl PipelineDefinition {
    /// Whether a pushed branch matches the push-trigger predicate.
    pub fn push_matches(&self, branch: &str) -> bool {
        match &self.push_trigger {
            None => false,
            Some(pattern) => match pattern.strip_suffix('*') {
                Some(prefix) => branch.starts_with(prefix),
                None => branch == pattern,
            },
        }
    }
}

impl PipelineDefinition {
    /// Validate the graph invariants. Called at create/update time;
    /// invalid graphs are rejected as client faults.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.entry_points.is_empty() && !self.steps.is_empty() {
            return Err(GraphError::NoEntryPoints);
        }
        for entry in &self.entry_points {
            if !self.steps.contains_key(entry.as_str()) {
                return Err(GraphError::UnknownStep(entry.clone()));
            }
        }
        let mut seen: HashMap<(&str, EdgeCondition), u32> = HashMap::new();
        for edge in &self.edges {
            if !self.steps.contains_key(edge.from.as_str()) {
                return Err(GraphError::UnknownStep(edge.from.clone()));
            }
            if let EdgeTarget::Step { step } = &edge.to {
                if !self.steps.contains_key(step.as_str()) {
                    return Err(GraphError::UnknownStep(step.clone()));
                }
            } else {
                // At most one terminal action per (source, condition)
                let count = seen.entry((edge.from.as_str(), edge.condition)).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return Err(GraphError::DuplicateEdge {
                        from: edge.from.clone(),
                        condition: edge.condition,
                    });
                }
            }
        }
        self.check_acyclic()?;
        self.check_reachable()?;
        Ok(())
    }

    /// Step successors of `from` whose condition fires for the given
    /// source outcome. Terminal-action targets are returned separately
    /// via [`Self::terminal_actions`].
    pub fn successors(&self, from: &str, source_succeeded: bool) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == from && e.condition.fires(source_succeeded))
            .filter_map(|e| match &e.to {
                EdgeTarget::Step { step } => Some(step.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Terminal actions reached from `from` for the given outcome.
    pub fn terminal_actions(&self, from: &str, source_succeeded: bool) -> Vec<&EdgeTarget> {
        self.edges
            .iter()
            .filter(|e| e.from == from && e.condition.fires(source_succeeded))
            .filter(|e| e.to.is_terminal_action())
            .map(|e| &e.to)
            .collect()
    }

    /// Inbound step edges of `to`.
    pub fn inbound(&self, to: &str) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| matches!(&e.to, EdgeTarget::Step { step } if step == to))
            .collect()
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        // Iterative DFS with three-color marking.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut marks: HashMap<&str, Mark> =
            self.steps.keys().map(|k| (k.as_str(), Mark::White)).collect();

        for start in self.steps.keys() {
            if marks.get(start.as_str()) != Some(&Mark::White) {
                continue;
            }
            let mut stack: Vec<(&str, bool)> = vec![(start.as_str(), false)];
            while let Some((node, children_done)) = stack.pop() {
                if children_done {
                    marks.insert(node, Mark::Black);
                    continue;
                }
                marks.insert(node, Mark::Grey);
                stack.push((node, true));
                for edge in self.edges.iter().filter(|e| e.from == node) {
                    if let EdgeTarget::Step { step } = &edge.to {
                        match marks.get(step.as_str()) {
                            Some(Mark::Grey) => return Err(GraphError::Cycle(step.clone())),
                            Some(Mark::White) => stack.push((step.as_str(), false)),
                            _ => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_reachable(&self) -> Result<(), GraphError> {
        let mut reached: HashSet<&str> = HashSet::new();
        let mut frontier: Vec<&str> = self.entry_points.iter().map(String::as_str).collect();
        while let Some(node) = frontier.pop() {
            if !reached.insert(node) {
                continue;
            }
            for edge in self.edges.iter().filter(|e| e.from == node) {
                if let EdgeTarget::Step { step } = &edge.to {
                    frontier.push(step.as_str());
                }
            }
        }
        for step in self.steps.keys() {
            if !reached.contains(step.as_str()) {
                return Err(GraphError::Unreachable(step.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
