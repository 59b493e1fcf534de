// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deadline management for the engine's timers.

use laf_core::{DebugSessionId, RunId, RunnerId, StepId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What fires when a deadline expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deadline {
    /// A dispatched step was not acked within the ack window.
    AckTimeout {
        run_id: RunId,
        step_id: StepId,
        runner_id: RunnerId,
    },
    /// A busy step exceeded its wall-clock timeout.
    StepTimeout { run_id: RunId, step_id: StepId },
    /// The cancel grace window after a step timeout elapsed.
    StepGrace { run_id: RunId, step_id: StepId },
    /// A debug session reached its absolute expiry.
    DebugExpiry { session_id: DebugSessionId },
}

impl Deadline {
    /// Stable key: one live deadline per concern per entity.
    pub fn key(&self) -> String {
        match self {
            Deadline::AckTimeout { step_id, .. } => format!("ack:{step_id}"),
            Deadline::StepTimeout { step_id, .. } => format!("timeout:{step_id}"),
            Deadline::StepGrace { step_id, .. } => format!("grace:{step_id}"),
            Deadline::DebugExpiry { session_id } => format!("debug:{session_id}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Timer {
    fires_at: Instant,
    deadline: Deadline,
}

/// Manages deadlines for the engine loop.
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: HashMap<String, Timer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a deadline.
    pub fn set(&mut self, deadline: Deadline, duration: Duration, now: Instant) {
        let fires_at = now + duration;
        self.timers
            .insert(deadline.key(), Timer { fires_at, deadline });
    }

    /// Disarm a deadline by key.
    pub fn cancel(&mut self, key: &str) {
        self.timers.remove(key);
    }

    /// Disarm every deadline attached to a step.
    pub fn cancel_step(&mut self, step_id: &StepId) {
        self.timers.remove(&format!("ack:{step_id}"));
        self.timers.remove(&format!("timeout:{step_id}"));
        self.timers.remove(&format!("grace:{step_id}"));
    }

    /// Collect and disarm every deadline that has fired.
    pub fn fired(&mut self, now: Instant) -> Vec<Deadline> {
        let keys: Vec<String> = self
            .timers
            .iter()
            .filter(|(_, t)| t.fires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.timers.remove(&k))
            .map(|t| t.deadline)
            .collect()
    }

    /// Earliest pending fire time.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.fires_at).min()
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
