//! Scenario: deterministic runner selection — earliest idle wins, ties
//! break on lexicographic runner id.

use crate::prelude::*;
use laf_core::test_support::linear_pipeline;
use laf_core::{RepoId, StepResultStatus, Trigger};
use laf_engine::StartRunRequest;
use std::time::Duration;

#[tokio::test]
async fn earlier_idle_runner_is_chosen() {
    let stack = stack().await;
    // r-z has been idle longer than r-a.
    let mut old_idle = RunnerClient::connect(&stack, "r-z", "any").await;
    stack.clock.advance(Duration::from_secs(50));
    let _young_idle = RunnerClient::connect(&stack, "r-a", "any").await;

    stack
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: linear_pipeline("r1", &["build"]),
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    // Despite r-a sorting first by id, r-z wins on idle time.
    let step_id = old_idle.expect_assign().await;
    old_idle.ack(&step_id).await;
    old_idle.finish(&step_id, StepResultStatus::Completed).await;
}

#[tokio::test]
async fn idle_tie_breaks_on_smaller_id() {
    let stack = stack().await;
    // Both register at the same fake instant.
    let mut first_by_id = RunnerClient::connect(&stack, "r-a", "any").await;
    let _other = RunnerClient::connect(&stack, "r-b", "any").await;

    stack
        .engine
        .start_run(StartRunRequest {
            repo_id: RepoId::new("r1"),
            definition: linear_pipeline("r1", &["build"]),
            trigger: Trigger::manual("main", "sha"),
        })
        .await
        .unwrap();

    let step_id = first_by_id.expect_assign().await;
    first_by_id.ack(&step_id).await;
    first_by_id
        .finish(&step_id, StepResultStatus::Completed)
        .await;
}
