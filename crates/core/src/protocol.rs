// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner duplex-channel wire messages.
//!
//! Each runner holds one persistent connection to the control plane.
//! Frames are length-delimited JSON objects with a `type` discriminator;
//! the `Hello` frame must come first from the runner side.

use crate::debug::DebugSessionId;
use crate::run::RunId;
use crate::runner::RunnerHello;
use crate::step::{StepId, StepKind};
use serde::{Deserialize, Serialize};

/// Repository state a runner needs to materialize a step's workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    pub clone_url: String,
    /// Ref name the step executes against (branch).
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit_sha: String,
}

/// Messages sent from the control plane to a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    #[serde(rename = "assign_step")]
    AssignStep {
        step_id: StepId,
        run_id: RunId,
        repo_snapshot: RepoSnapshot,
        kind: StepKind,
        /// Opaque configuration payload interpreted by the runner.
        config: serde_json::Value,
        timeout_s: u64,
        /// Log tail of the prior continue-in-context step, supplied as
        /// "previous output" to AI-typed steps.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prior_context: Option<String>,
    },

    #[serde(rename = "cancel_step")]
    CancelStep { step_id: StepId },

    /// Dispatcher rollback: the assignment the runner is acking no
    /// longer exists; the runner must return to idle.
    #[serde(rename = "abort_step")]
    AbortStep { step_id: StepId, reason: String },

    #[serde(rename = "ping")]
    Ping { seq: u64 },

    #[serde(rename = "debug_resume")]
    DebugResume { session_id: DebugSessionId },

    #[serde(rename = "debug_abort")]
    DebugAbort { session_id: DebugSessionId },
}

/// Terminal status reported by a runner for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResultStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Messages sent from a runner to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunnerMsg {
    /// Must be the first frame on a new connection.
    #[serde(rename = "hello")]
    Hello(RunnerHello),

    #[serde(rename = "ack_step")]
    AckStep { step_id: StepId },

    /// Batched log lines, in runner emission order.
    #[serde(rename = "step_logs")]
    StepLogs { step_id: StepId, lines: Vec<String> },

    #[serde(rename = "step_result")]
    StepResult {
        step_id: StepId,
        status: StepResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Unified diff produced by an AI agent step, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        produced_diff: Option<String>,
        /// Branch the runner pushed its work to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        produced_branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files_changed: Option<u32>,
    },

    #[serde(rename = "pong")]
    Pong { seq: u64 },

    #[serde(rename = "debug_at_breakpoint")]
    DebugAtBreakpoint {
        session_id: DebugSessionId,
        step_index: u32,
        /// Handle the external session uses to reach the paused
        /// worktree (runner-defined, opaque to the core).
        workspace_handle: String,
    },
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
