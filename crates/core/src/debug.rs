// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debug sessions: out-of-band supervisory channels layered over a run.

use crate::run::RunId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

crate::define_id! {
    /// Unique identifier for a debug session.
    #[derive(Default)]
    pub struct DebugSessionId;
}

/// Lifecycle state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugState {
    Pending,
    WaitingAtBp,
    Connected,
    Resumed,
    Aborted,
    Timeout,
    Ended,
}

impl DebugState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DebugState::Aborted | DebugState::Timeout | DebugState::Ended
        )
    }
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugState::Pending => write!(f, "pending"),
            DebugState::WaitingAtBp => write!(f, "waiting_at_bp"),
            DebugState::Connected => write!(f, "connected"),
            DebugState::Resumed => write!(f, "resumed"),
            DebugState::Aborted => write!(f, "aborted"),
            DebugState::Timeout => write!(f, "timeout"),
            DebugState::Ended => write!(f, "ended"),
        }
    }
}

/// A supervisory session bound to one run.
///
/// A run may hold at most one non-terminal debug session. On expiry
/// the session transitions to `timeout` and the paused step (if any)
/// is released as cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSession {
    pub id: DebugSessionId,
    pub run_id: RunId,
    /// Bearer token presented by the attaching client.
    pub token: String,
    pub state: DebugState,
    /// Absolute expiry in epoch ms.
    pub expires_at_ms: u64,
    /// Step indices at which the run pauses.
    #[serde(default)]
    pub breakpoints: BTreeSet<u32>,
    /// Step index the run is currently paused at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_step: Option<u32>,
    pub created_at_ms: u64,
}

impl DebugSession {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the session has passed its absolute expiry.
    pub fn is_expired(&self, epoch_ms: u64) -> bool {
        epoch_ms > self.expires_at_ms
    }
}

#[cfg(test)]
#[path = "debug_tests.rs"]
mod tests;
