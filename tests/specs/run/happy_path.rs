//! Scenario: a three-step pipeline (build, test, merge-to-main) runs
//! to completion on a single idle runner, with the merge executed
//! inline by the git substrate.

use crate::prelude::*;
use laf_bus::Frame;
use laf_core::test_support::linear_pipeline;
use laf_core::{
    Event, RepoId, RouteSelector, RunState, StepKind, StepResultStatus, StepState, StepTemplate,
    Topic, Trigger,
};
use laf_engine::StartRunRequest;

#[tokio::test]
async fn three_step_pipeline_with_merge_passes() {
    let stack = stack().await;
    let mut runner = RunnerClient::connect(&stack, "r-1", "any").await;

    let mut def = linear_pipeline("r1", &["build", "test", "merge-to-main"]);
    if let Some(t) = def.steps.get_mut("merge-to-main") {
        *t = StepTemplate {
            kind: StepKind::GitAction,
            config: serde_json::json!({"action": "merge", "target": "main"}),
            selector: RouteSelector::Any,
            continue_in_context: false,
            timeout_s: None,
        };
    }

    let run_id = stack
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: def,
            trigger: Trigger::manual("feature/x", "sha"),
        })
        .await
        .unwrap();

    // Observe the run topic from the start.
    let mut sub = stack.bus.subscribe(Topic::parse(&format!("run:{run_id}")).unwrap(), Some(0));

    for expected in ["build", "test"] {
        let step_id = runner.expect_assign().await;
        let step = stack.db.get_step(&step_id).unwrap().unwrap();
        assert_eq!(step.name, expected);
        runner.ack(&step_id).await;
        runner.logs(&step_id, &["working...", "ok"]).await;
        runner.finish(&step_id, StepResultStatus::Completed).await;
    }

    wait_for(
        || {
            stack
                .db
                .get_run(&run_id)
                .unwrap()
                .unwrap()
                .state
                .is_terminal()
        },
        "run terminal",
    )
    .await;

    let run = stack.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.state, RunState::Passed);
    assert_eq!(run.steps_completed, 3);
    assert!(run.steps.iter().all(|s| s.state == StepState::Completed));

    // The run topic saw three completed transitions then the passed
    // status, in executor commit order.
    let mut completed = Vec::new();
    let mut passed = 0;
    let mut last_seq = 0;
    while let Ok(frame) = sub.rx.try_recv() {
        let Frame::Event(e) = frame else { continue };
        assert!(e.seq > last_seq, "seq must be strictly increasing");
        last_seq = e.seq;
        match e.event {
            Event::StepStatus {
                state: StepState::Completed,
                index,
                ..
            } => completed.push(index),
            Event::RunStatus {
                state: RunState::Passed,
                steps_completed,
                ..
            } => {
                assert_eq!(steps_completed, 3);
                passed += 1;
            }
            _ => {}
        }
    }
    assert_eq!(completed, vec![0, 1, 2]);
    assert_eq!(passed, 1);
}
