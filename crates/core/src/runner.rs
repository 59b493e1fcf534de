// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner identity and lifecycle state machine.

use crate::step::{RouteSelector, StepId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

crate::define_id! {
    /// Unique identifier for a runner.
    ///
    /// Stable across reconnects: a runner that proposes a known id on
    /// registration is revived rather than duplicated.
    #[derive(Default)]
    pub struct RunnerId;
}

/// Lifecycle state of a runner.
///
/// ```text
/// disconnected → connecting → idle ⇄ assigned → busy
///                   ↑           ↓        ↓        ↓
///                   └─── dead ←─┴────────┴────────┘  (heartbeat timeout)
/// ```
///
/// Every state may transition to `dead` on heartbeat expiry; from `dead`
/// a fresh registration moves through `connecting` back to `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Disconnected,
    Connecting,
    Idle,
    Assigned,
    Busy,
    Dead,
}

impl RunnerState {
    /// True when the runner currently holds (or is being handed) a step.
    pub fn is_active(&self) -> bool {
        matches!(self, RunnerState::Assigned | RunnerState::Busy)
    }

    /// True when the runner can be offered new work.
    pub fn is_idle(&self) -> bool {
        matches!(self, RunnerState::Idle)
    }

    /// Whether a transition to `next` is legal under the lifecycle graph.
    pub fn can_transition_to(&self, next: RunnerState) -> bool {
        use RunnerState::*;
        match (self, next) {
            // heartbeat expiry from anywhere
            (_, Dead) => true,
            (Disconnected, Connecting) | (Dead, Connecting) => true,
            (Connecting, Idle) => true,
            (Idle, Assigned) => true,
            (Assigned, Busy) => true,
            // release from any non-terminal active state
            (Assigned, Idle) | (Busy, Idle) => true,
            // explicit close
            (Connecting, Disconnected)
            | (Idle, Disconnected)
            | (Assigned, Disconnected)
            | (Busy, Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Disconnected => write!(f, "disconnected"),
            RunnerState::Connecting => write!(f, "connecting"),
            RunnerState::Idle => write!(f, "idle"),
            RunnerState::Assigned => write!(f, "assigned"),
            RunnerState::Busy => write!(f, "busy"),
            RunnerState::Dead => write!(f, "dead"),
        }
    }
}

/// First-frame registration payload proposed by a connecting runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerHello {
    /// Client-proposed stable id. A fresh id is minted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<String>,
    pub name: String,
    /// Free-form tag matched against step routing selectors.
    pub runner_type: String,
    /// Capability labels matched against step label predicates.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A registered runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: RunnerId,
    pub name: String,
    pub runner_type: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub state: RunnerState,
    /// Epoch ms of the most recent heartbeat (or any inbound frame).
    pub last_heartbeat_ms: u64,
    /// Epoch ms since the runner last became idle. Drives dispatch
    /// tie-breaking: earliest idle first.
    pub idle_since_ms: u64,
    /// Step currently attached to this runner. At most one at any
    /// instant, and only while `state` is assigned or busy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepId>,
    pub connected_at_ms: u64,
}

impl Runner {
    /// Admit a new runner from its hello frame.
    pub fn admit(id: RunnerId, hello: RunnerHello, epoch_ms: u64) -> Self {
        Self {
            id,
            name: hello.name,
            runner_type: hello.runner_type,
            labels: hello.labels,
            state: RunnerState::Connecting,
            last_heartbeat_ms: epoch_ms,
            idle_since_ms: epoch_ms,
            current_step: None,
            connected_at_ms: epoch_ms,
        }
    }

    /// Eligibility for a step routing selector.
    ///
    /// A runner matches when the selector is `any`, when its
    /// `runner_type` equals the requested type, or when its labels
    /// satisfy every requested key/value pair.
    pub fn matches(&self, selector: &RouteSelector) -> bool {
        match selector {
            RouteSelector::Any => true,
            RouteSelector::RunnerType(t) => &self.runner_type == t,
            RouteSelector::Labels(wanted) => wanted
                .iter()
                .all(|(k, v)| self.labels.get(k).is_some_and(|have| have == v)),
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
