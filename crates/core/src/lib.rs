// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! laf-core: entities, state machines and contracts for the LazyAF control plane

pub mod card;
pub mod clock;
pub mod config;
pub mod debug;
pub mod event;
pub mod graph;
pub mod id;
pub mod protocol;
pub mod repo;
pub mod run;
pub mod runner;
pub mod step;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use card::{Card, CardId, CardStatus};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::Config;
pub use debug::{DebugSession, DebugSessionId, DebugState};
pub use event::{Event, EventClass, Topic, TopicKind};
pub use graph::{
    Edge, EdgeCondition, EdgeTarget, GraphError, PipelineDefinition, PipelineId, RunOutcome,
    StepTemplate,
};
pub use id::{IdGen, SequentialIdGen, ShortId, UuidIdGen};
pub use protocol::{RepoSnapshot, RunnerMsg, ServerMsg, StepResultStatus};
pub use repo::Repo;
pub use run::{PipelineRun, RepoId, RunHook, RunId, RunState, Trigger, TriggerKind};
pub use runner::{Runner, RunnerHello, RunnerId, RunnerState};
pub use step::{RouteSelector, Step, StepId, StepKind, StepState};
