// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared engine-test harness: a full engine over in-memory storage,
//! a real git store in a tempdir, and fake runner channels.

use crate::engine::{Engine, EngineDeps};
use crate::sink::{RunnerSink, SinkError};
use async_trait::async_trait;
use laf_bus::EventBus;
use laf_core::test_support::runner_hello_with_id;
use laf_core::{Clock, Config, FakeClock, Repo, RepoId, RunnerId, ServerMsg};
use laf_git::GitStore;
use laf_storage::{Database, LogStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub(crate) struct Harness {
    pub engine: Arc<Engine<FakeClock>>,
    pub clock: FakeClock,
    pub db: Arc<Database>,
    pub bus: Arc<EventBus>,
    pub git: Arc<GitStore>,
    pub logs: Arc<LogStore>,
    #[allow(dead_code)]
    pub dir: TempDir,
}

/// Engine over tempdir git storage with repo `r1` seeded on `main`.
pub(crate) async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let db = Arc::new(Database::open_in_memory().unwrap());
    let bus = Arc::new(EventBus::new(256, 4096));
    let git = Arc::new(GitStore::new(dir.path().join("repos")));
    let logs = Arc::new(LogStore::new(dir.path().join("logs")));

    git.init_repo(&RepoId::new("r1"), "main").await.unwrap();
    db.insert_repo(&Repo {
        id: RepoId::new("r1"),
        name: "repo-one".to_string(),
        default_branch: "main".to_string(),
        clone_token: "tok".to_string(),
        created_at_ms: clock.epoch_ms(),
    })
    .unwrap();

    let engine = Engine::new(EngineDeps {
        config: Config::default(),
        clock: clock.clone(),
        db: Arc::clone(&db),
        logs: Arc::clone(&logs),
        git: Arc::clone(&git),
        bus: Arc::clone(&bus),
        http_base: "http://127.0.0.1:7780".to_string(),
    });

    Harness {
        engine,
        clock,
        db,
        bus,
        git,
        logs,
        dir,
    }
}

/// Captures frames the engine sends to one fake runner.
#[derive(Debug)]
pub(crate) struct FakeRunnerSink {
    pub sent: Mutex<Vec<ServerMsg>>,
}

impl FakeRunnerSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn assigns(&self) -> Vec<ServerMsg> {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m, ServerMsg::AssignStep { .. }))
            .cloned()
            .collect()
    }

    pub fn frames(&self) -> Vec<ServerMsg> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl RunnerSink for FakeRunnerSink {
    async fn send(&self, msg: ServerMsg) -> Result<(), SinkError> {
        self.sent.lock().push(msg);
        Ok(())
    }
}

/// Register a fake runner with a stable id.
pub(crate) fn connect_runner(
    harness: &Harness,
    id: &str,
    runner_type: &str,
) -> (RunnerId, Arc<FakeRunnerSink>) {
    let sink = FakeRunnerSink::new();
    let runner = harness
        .engine
        .on_runner_connected(
            runner_hello_with_id(id, id, runner_type),
            Arc::clone(&sink) as Arc<dyn RunnerSink>,
        )
        .unwrap();
    (runner.id, sink)
}

/// Spin until `cond` holds (real-time polling; the fake clock governs
/// deadlines only).
pub(crate) async fn wait_for(cond: impl Fn() -> bool, what: &str) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
