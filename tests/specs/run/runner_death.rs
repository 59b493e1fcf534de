//! Scenario: a runner acks a step and goes silent; after the heartbeat
//! deadline the runner is dead, the step fails as disappeared, and the
//! run follows its failure routing.

use crate::prelude::*;
use laf_bus::Frame;
use laf_core::test_support::linear_pipeline;
use laf_core::{Event, RepoId, RunState, RunnerState, StepState, Topic, Trigger};
use laf_engine::StartRunRequest;
use std::time::Duration;

#[tokio::test]
async fn silent_runner_fails_its_step() {
    let stack = stack().await;
    let mut runner = RunnerClient::connect(&stack, "r-1", "any").await;

    let run_id = stack
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: linear_pipeline("r1", &["build"]),
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    let runner_topic = Topic::parse("runner:r-1").unwrap();
    let mut runner_sub = stack.bus.subscribe(runner_topic, Some(0));

    let step_id = runner.expect_assign().await;
    runner.ack(&step_id).await;

    // Silence. The wire stays open, but no frames arrive.
    stack.clock.advance(Duration::from_secs(31));
    stack.engine.tick_now().await;

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
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.steps[0].state, StepState::Failed);
    assert_eq!(run.steps[0].error.as_deref(), Some("runner disappeared"));

    // Exactly one dead transition on the runner topic.
    let mut dead = 0;
    while let Ok(frame) = runner_sub.rx.try_recv() {
        if let Frame::Event(e) = frame {
            if matches!(
                e.event,
                Event::RunnerStatus {
                    state: RunnerState::Dead,
                    ..
                }
            ) {
                dead += 1;
            }
        }
    }
    assert_eq!(dead, 1);
}
