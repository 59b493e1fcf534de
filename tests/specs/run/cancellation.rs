//! Scenario: cancelling a run with a busy step sends CancelStep; the
//! runner confirms within the grace window and the run lands
//! cancelled with counters untouched.

use crate::prelude::*;
use laf_core::test_support::linear_pipeline;
use laf_core::{RepoId, RunState, ServerMsg, StepResultStatus, StepState, Trigger};
use laf_engine::StartRunRequest;

#[tokio::test]
async fn cancel_with_busy_runner_confirms_and_closes() {
    let stack = stack().await;
    let mut runner = RunnerClient::connect(&stack, "r-1", "any").await;

    let run_id = stack
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: linear_pipeline("r1", &["build", "test"]),
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    let step_id = runner.expect_assign().await;
    runner.ack(&step_id).await;

    stack.engine.cancel_run(&run_id).await.unwrap();

    // The busy step receives the cancel directive over the wire.
    match runner.recv().await {
        ServerMsg::CancelStep { step_id: cancelled } => assert_eq!(cancelled, step_id),
        other => panic!("expected cancel_step, got {other:?}"),
    }
    runner.finish(&step_id, StepResultStatus::Cancelled).await;

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
    assert_eq!(run.state, RunState::Cancelled);
    assert_eq!(run.steps_completed, 0);
    assert!(run.steps.iter().all(|s| s.state == StepState::Cancelled));
}
