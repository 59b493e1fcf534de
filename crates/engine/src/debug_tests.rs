// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::engine::StartRunRequest;
use crate::test_helpers::{connect_runner, harness, wait_for, Harness};
use laf_core::test_support::linear_pipeline;
use laf_core::{RepoId, RunState, RunnerMsg, ServerMsg, StepResultStatus, Trigger};
use std::time::Duration;

async fn complete(h: &Harness, runner_id: &laf_core::RunnerId, step_id: laf_core::StepId) {
    h.engine
        .on_runner_msg(runner_id, RunnerMsg::AckStep { step_id: step_id.clone() })
        .await;
    h.engine
        .on_runner_msg(
            runner_id,
            RunnerMsg::StepResult {
                step_id,
                status: StepResultStatus::Completed,
                exit_code: Some(0),
                error: None,
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;
}

fn assigned(msg: &ServerMsg) -> laf_core::StepId {
    match msg {
        ServerMsg::AssignStep { step_id, .. } => step_id.clone(),
        other => panic!("expected assign, got {other:?}"),
    }
}

#[tokio::test]
async fn session_lifecycle_create_attach_resume() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");

    let run_id = h
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: linear_pipeline("r1", &["build", "test"]),
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    wait_for(|| sink.assigns().len() == 1, "build assign").await;

    // Break before step index 1 while build is still running.
    let session = h
        .engine
        .debug_sessions()
        .create(run_id.clone(), [1u32].into_iter().collect())
        .unwrap();
    assert_eq!(session.state, DebugState::Pending);

    // Only one live session per run
    let err = h
        .engine
        .debug_sessions()
        .create(run_id.clone(), [2u32].into_iter().collect())
        .unwrap_err();
    assert!(matches!(err, EngineError::DebugSessionExists { .. }));

    // Wrong token is rejected; the right one attaches.
    assert!(h
        .engine
        .debug_sessions()
        .attach(&session.id, "wrong")
        .is_err());
    let attached = h
        .engine
        .debug_sessions()
        .attach(&session.id, &session.token)
        .unwrap();
    assert_eq!(attached.state, DebugState::Connected);

    // Finish build; the run pauses at the breakpoint instead of
    // dispatching "test".
    complete(&h, &runner_id, assigned(&sink.assigns()[0])).await;
    wait_for(
        || {
            h.engine
                .debug_sessions()
                .get(&session.id)
                .unwrap()
                .state
                == DebugState::WaitingAtBp
        },
        "session waiting at breakpoint",
    )
    .await;
    let paused = h.engine.debug_sessions().get(&session.id).unwrap();
    assert_eq!(paused.paused_step, Some(1));
    assert_eq!(sink.assigns().len(), 1, "test must not dispatch while paused");

    // Resume releases the held step.
    h.engine.debug_sessions().resume(&session.id).await.unwrap();
    wait_for(|| sink.assigns().len() == 2, "test assign after resume").await;
    complete(&h, &runner_id, assigned(&sink.assigns()[1])).await;

    wait_for(
        || h.db.get_run(&run_id).unwrap().unwrap().state.is_terminal(),
        "run terminal",
    )
    .await;
    assert_eq!(h.db.get_run(&run_id).unwrap().unwrap().state, RunState::Passed);

    // The session is closed when its run finishes.
    wait_for(
        || h.engine.debug_sessions().get(&session.id).unwrap().is_terminal(),
        "session ended",
    )
    .await;
}

#[tokio::test]
async fn expiry_times_out_session_and_cancels_paused_run() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");

    let run_id = h
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: linear_pipeline("r1", &["build", "test"]),
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();
    wait_for(|| sink.assigns().len() == 1, "build assign").await;

    let session = h
        .engine
        .debug_sessions()
        .create(run_id.clone(), [1u32].into_iter().collect())
        .unwrap();

    complete(&h, &runner_id, assigned(&sink.assigns()[0])).await;
    wait_for(
        || {
            h.engine.debug_sessions().get(&session.id).unwrap().state
                == DebugState::WaitingAtBp
        },
        "paused",
    )
    .await;

    // Absolute expiry passes (default TTL 1800 s)
    h.clock.advance(Duration::from_secs(1801));
    h.engine.tick_now().await;

    wait_for(
        || {
            h.engine.debug_sessions().get(&session.id).unwrap().state == DebugState::Timeout
        },
        "session timeout",
    )
    .await;

    // The paused step was released as cancelled and the run wound down.
    wait_for(
        || h.db.get_run(&run_id).unwrap().unwrap().state.is_terminal(),
        "run terminal",
    )
    .await;
    let run = h.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Cancelled);
    assert_eq!(sink.assigns().len(), 1);
}

#[tokio::test]
async fn extend_pushes_expiry_forward() {
    let h = harness().await;
    let (_runner_id, _sink) = connect_runner(&h, "r-1", "shell");

    let run_id = h
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: linear_pipeline("r1", &["build"]),
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    let session = h
        .engine
        .debug_sessions()
        .create(run_id, [0u32].into_iter().collect())
        .unwrap();
    let original_expiry = session.expires_at_ms;

    h.clock.advance(Duration::from_secs(1000));
    let extended = h.engine.debug_sessions().extend(&session.id).unwrap();
    assert!(extended.expires_at_ms > original_expiry);

    // Past the original expiry the session is still alive
    h.clock.advance(Duration::from_secs(801));
    h.engine.tick_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h
        .engine
        .debug_sessions()
        .get(&session.id)
        .unwrap()
        .is_terminal());
}

#[tokio::test]
async fn runner_breakpoint_report_is_published() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");

    let run_id = h
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: linear_pipeline("r1", &["build"]),
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();
    wait_for(|| sink.assigns().len() == 1, "assign").await;

    let session = h
        .engine
        .debug_sessions()
        .create(run_id, [5u32].into_iter().collect())
        .unwrap();

    let topic = laf_core::Topic::parse(&format!("debug:{}", session.id)).unwrap();
    let mut sub = h.bus.subscribe(topic, None);

    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::DebugAtBreakpoint {
                session_id: session.id.clone(),
                step_index: 5,
                workspace_handle: "wt-abc".to_string(),
            },
        )
        .await;

    wait_for(
        || {
            h.engine.debug_sessions().get(&session.id).unwrap().state
                == DebugState::WaitingAtBp
        },
        "waiting state",
    )
    .await;

    let mut saw_breakpoint = false;
    while let Ok(frame) = sub.rx.try_recv() {
        if let laf_bus::Frame::Event(e) = frame {
            if let Event::DebugBreakpoint {
                step_index,
                workspace_handle,
                ..
            } = e.event
            {
                assert_eq!(step_index, 5);
                assert_eq!(workspace_handle, "wt-abc");
                saw_breakpoint = true;
            }
        }
    }
    assert!(saw_breakpoint);
}
