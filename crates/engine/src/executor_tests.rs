// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::engine::StartRunRequest;
use crate::test_helpers::{connect_runner, harness, wait_for, Harness};
use laf_core::test_support::{linear_pipeline, shell_template};
use laf_core::{
    Edge, EdgeCondition, EdgeTarget, RouteSelector, RunId, RunOutcome, RunnerMsg, StepTemplate,
    Trigger,
};

async fn start_linear(h: &Harness, names: &[&str]) -> RunId {
    let def = linear_pipeline("r1", names);
    h.engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: def,
            trigger: Trigger::manual("main", "sha-unused"),
        })
        .await
        .unwrap()
}

fn run_state(h: &Harness, run_id: &RunId) -> RunState {
    h.db.get_run(run_id).unwrap().unwrap().state
}

fn assigned_step(msg: &ServerMsg) -> StepId {
    match msg {
        ServerMsg::AssignStep { step_id, .. } => step_id.clone(),
        other => panic!("expected assign, got {other:?}"),
    }
}

#[tokio::test]
async fn happy_path_linear_run_passes() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");

    let run_id = start_linear(&h, &["build", "test"]).await;

    // build dispatches first
    wait_for(|| sink.assigns().len() == 1, "first assign").await;
    let step0 = assigned_step(&sink.assigns()[0]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: step0.clone() })
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepLogs {
                step_id: step0.clone(),
                lines: vec!["compiling".to_string(), "done".to_string()],
            },
        )
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: step0,
                status: StepResultStatus::Completed,
                exit_code: Some(0),
                error: None,
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;

    // test dispatches next on the same runner
    wait_for(|| sink.assigns().len() == 2, "second assign").await;
    let step1 = assigned_step(&sink.assigns()[1]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: step1.clone() })
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: step1,
                status: StepResultStatus::Completed,
                exit_code: Some(0),
                error: None,
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;

    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    let run = h.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Passed);
    assert_eq!(run.steps_completed, 2);
    assert!(run.steps.iter().all(|s| s.state == StepState::Completed));
}

#[tokio::test]
async fn zero_step_pipeline_passes_immediately() {
    let h = harness().await;
    let run_id = start_linear(&h, &[]).await;
    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    assert_eq!(run_state(&h, &run_id), RunState::Passed);
}

#[tokio::test]
async fn failure_without_routing_fails_the_run() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");
    let run_id = start_linear(&h, &["build", "test"]).await;

    wait_for(|| sink.assigns().len() == 1, "assign").await;
    let step0 = assigned_step(&sink.assigns()[0]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: step0.clone() })
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: step0,
                status: StepResultStatus::Failed,
                exit_code: Some(1),
                error: Some("boom".to_string()),
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;

    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    let run = h.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.steps_completed, 0);

    // The unreachable successor was skipped as cancelled
    let test_step = run.steps.iter().find(|s| s.name == "test").unwrap();
    assert_eq!(test_step.state, StepState::Cancelled);
    // No second assignment ever went out
    assert_eq!(sink.assigns().len(), 1);
}

#[tokio::test]
async fn failure_edge_routes_to_cleanup_step() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");

    let mut def = linear_pipeline("r1", &["build"]);
    def.steps
        .insert("cleanup".to_string(), shell_template("cleanup.sh"));
    def.edges.push(Edge {
        from: "build".to_string(),
        to: EdgeTarget::Step {
            step: "cleanup".to_string(),
        },
        condition: EdgeCondition::Failure,
    });
    def.edges.push(Edge {
        from: "cleanup".to_string(),
        to: EdgeTarget::Stop {
            outcome: RunOutcome::Failed,
        },
        condition: EdgeCondition::Success,
    });

    let run_id = h
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: def,
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    wait_for(|| sink.assigns().len() == 1, "build assign").await;
    let build = assigned_step(&sink.assigns()[0]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: build.clone() })
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: build,
                status: StepResultStatus::Failed,
                exit_code: Some(2),
                error: Some("compile error".to_string()),
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;

    // The failure edge fires: cleanup dispatches
    wait_for(|| sink.assigns().len() == 2, "cleanup assign").await;
    let cleanup = assigned_step(&sink.assigns()[1]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: cleanup.clone() })
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: cleanup,
                status: StepResultStatus::Completed,
                exit_code: Some(0),
                error: None,
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;

    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    // stop(failed) on the cleanup path decides the outcome
    assert_eq!(run_state(&h, &run_id), RunState::Failed);
}

#[tokio::test]
async fn cancellation_with_busy_runner() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");
    let run_id = start_linear(&h, &["build", "test"]).await;

    wait_for(|| sink.assigns().len() == 1, "assign").await;
    let step0 = assigned_step(&sink.assigns()[0]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: step0.clone() })
        .await;

    h.engine.cancel_run(&run_id).await.unwrap();

    // The busy runner receives CancelStep and confirms
    wait_for(
        || {
            sink.frames()
                .iter()
                .any(|m| matches!(m, ServerMsg::CancelStep { .. }))
        },
        "cancel frame",
    )
    .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: step0,
                status: StepResultStatus::Cancelled,
                exit_code: None,
                error: None,
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;

    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    let run = h.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Cancelled);
    assert_eq!(run.steps_completed, 0, "counters unchanged by cancel");
    assert!(run.steps.iter().all(|s| s.state == StepState::Cancelled));
}

#[tokio::test]
async fn runner_death_fails_the_busy_step() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");
    let run_id = start_linear(&h, &["build"]).await;

    wait_for(|| sink.assigns().len() == 1, "assign").await;
    let step0 = assigned_step(&sink.assigns()[0]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: step0.clone() })
        .await;

    // Runner goes silent past the heartbeat deadline
    h.clock.advance(Duration::from_secs(31));
    h.engine.tick_now().await;

    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    let run = h.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Failed);
    let step = &run.steps[0];
    assert_eq!(step.state, StepState::Failed);
    assert_eq!(step.error.as_deref(), Some("runner disappeared"));

    // Exactly one dead transition was published for the runner
    let topic = laf_core::Topic::parse(&format!("runner:{runner_id}")).unwrap();
    let mut sub = h.bus.subscribe(topic, Some(0));
    let mut dead_events = 0;
    while let Ok(frame) = sub.rx.try_recv() {
        if let laf_bus::Frame::Event(e) = frame {
            if matches!(
                e.event,
                Event::RunnerStatus {
                    state: laf_core::RunnerState::Dead,
                    ..
                }
            ) {
                dead_events += 1;
            }
        }
    }
    assert_eq!(dead_events, 1);
}

#[tokio::test]
async fn step_timeout_cancels_then_fails_and_discards_late_result() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");
    let run_id = start_linear(&h, &["build"]).await;

    wait_for(|| sink.assigns().len() == 1, "assign").await;
    let step0 = assigned_step(&sink.assigns()[0]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: step0.clone() })
        .await;

    // Wall-clock timeout (default 300s) expires
    h.clock.advance(Duration::from_secs(301));
    h.engine.tick_now().await;
    wait_for(
        || {
            sink.frames()
                .iter()
                .any(|m| matches!(m, ServerMsg::CancelStep { .. }))
        },
        "cancel on timeout",
    )
    .await;
    // Keep the runner alive through the grace window
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::Pong { seq: 1 })
        .await;

    // Grace window passes without a reply
    h.clock.advance(Duration::from_secs(31));
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::Pong { seq: 2 })
        .await;
    h.engine.tick_now().await;

    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    assert_eq!(run_state(&h, &run_id), RunState::Failed);

    // A late reply is discarded
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: step0.clone(),
                status: StepResultStatus::Completed,
                exit_code: Some(0),
                error: None,
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let run = h.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.steps[0].state, StepState::Failed);
}

#[tokio::test]
async fn failed_step_retains_log_tail() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");
    let run_id = start_linear(&h, &["build"]).await;

    wait_for(|| sink.assigns().len() == 1, "assign").await;
    let step0 = assigned_step(&sink.assigns()[0]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: step0.clone() })
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepLogs {
                step_id: step0.clone(),
                lines: vec!["error: segfault".to_string()],
            },
        )
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: step0.clone(),
                status: StepResultStatus::Failed,
                exit_code: Some(139),
                error: Some("crashed".to_string()),
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;

    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    let step = h.db.get_step(&step0).unwrap().unwrap();
    assert_eq!(step.log_tail, vec!["error: segfault".to_string()]);
    assert_eq!(step.error.as_deref(), Some("crashed"));
}

#[tokio::test]
async fn continue_in_context_feeds_prior_output_to_agent_successor() {
    let h = harness().await;
    let (runner_id, sink) = connect_runner(&h, "r-1", "shell");

    let mut def = linear_pipeline("r1", &["gen", "use"]);
    for (_, template) in def.steps.iter_mut() {
        *template = StepTemplate {
            kind: StepKind::Agent,
            config: serde_json::json!({"prompt": "work"}),
            selector: RouteSelector::Any,
            continue_in_context: false,
            timeout_s: None,
        };
    }
    if let Some(t) = def.steps.get_mut("gen") {
        t.continue_in_context = true;
    }

    let run_id = h
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: def,
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    wait_for(|| sink.assigns().len() == 1, "gen assign").await;
    let gen = assigned_step(&sink.assigns()[0]);
    h.engine
        .on_runner_msg(&runner_id, RunnerMsg::AckStep { step_id: gen.clone() })
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepLogs {
                step_id: gen.clone(),
                lines: vec!["plan: refactor module".to_string()],
            },
        )
        .await;
    h.engine
        .on_runner_msg(
            &runner_id,
            RunnerMsg::StepResult {
                step_id: gen,
                status: StepResultStatus::Completed,
                exit_code: Some(0),
                error: None,
                produced_diff: None,
                produced_branch: None,
                files_changed: None,
            },
        )
        .await;

    wait_for(|| sink.assigns().len() == 2, "use assign").await;
    match &sink.assigns()[1] {
        ServerMsg::AssignStep { prior_context, .. } => {
            assert_eq!(prior_context.as_deref(), Some("plan: refactor module"));
        }
        other => panic!("expected assign, got {other:?}"),
    }

    let _ = run_id;
}

#[tokio::test]
async fn inline_merge_step_runs_without_a_runner() {
    let h = harness().await;
    // No runners connected at all.
    let mut def = linear_pipeline("r1", &["land"]);
    if let Some(t) = def.steps.get_mut("land") {
        *t = StepTemplate {
            kind: StepKind::GitAction,
            config: serde_json::json!({"action": "merge", "target": "main"}),
            selector: RouteSelector::Any,
            continue_in_context: false,
            timeout_s: None,
        };
    }

    let run_id = h
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: def,
            trigger: Trigger::manual("feature/x", "sha"),
        })
        .await
        .unwrap();

    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    let run = h.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Passed);
    assert_eq!(run.steps_completed, 1);
}

#[tokio::test]
async fn selector_with_no_matching_runner_leaves_step_ready() {
    let h = harness().await;
    let (_runner_id, sink) = connect_runner(&h, "r-1", "shell");

    let mut def = linear_pipeline("r1", &["special"]);
    if let Some(t) = def.steps.get_mut("special") {
        t.selector = RouteSelector::RunnerType("gpu".to_string());
    }
    let run_id = h
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: def,
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sink.assigns().is_empty(), "ineligible runner got work");
    let run = h.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Running);
    assert_eq!(run.steps[0].state, StepState::Ready);

    // Cancellation drains the stuck step
    h.engine.cancel_run(&run_id).await.unwrap();
    wait_for(|| run_state(&h, &run_id).is_terminal(), "run terminal").await;
    assert_eq!(run_state(&h, &run_id), RunState::Cancelled);
}
