// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn session() -> DebugSession {
    DebugSession {
        id: DebugSessionId::new("dbg-1"),
        run_id: RunId::new("run-1"),
        token: "tok".to_string(),
        state: DebugState::Pending,
        expires_at_ms: 10_000,
        breakpoints: [1, 3].into_iter().collect(),
        paused_step: None,
        created_at_ms: 1_000,
    }
}

#[test]
fn expiry_is_strict() {
    let s = session();
    assert!(!s.is_expired(9_999));
    // deadline exactly met counts as alive
    assert!(!s.is_expired(10_000));
    assert!(s.is_expired(10_001));
}

#[test]
fn terminal_states() {
    for state in [DebugState::Aborted, DebugState::Timeout, DebugState::Ended] {
        assert!(state.is_terminal());
    }
    for state in [
        DebugState::Pending,
        DebugState::WaitingAtBp,
        DebugState::Connected,
        DebugState::Resumed,
    ] {
        assert!(!state.is_terminal());
    }
}

#[test]
fn breakpoints_are_ordered() {
    let s = session();
    let bps: Vec<u32> = s.breakpoints.iter().copied().collect();
    assert_eq!(bps, vec![1, 3]);
}
