//! Shared spec harness.

use laf_bus::EventBus;
use laf_core::test_support::runner_hello_with_id;
use laf_core::{
    Clock, Config, FakeClock, Repo, RepoId, RunnerMsg, ServerMsg, StepId, StepResultStatus,
};
use laf_daemon::protocol_wire;
use laf_daemon::runner_listener;
use laf_engine::{Engine, EngineDeps};
use laf_git::GitStore;
use laf_storage::{Database, LogStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Stack {
    pub engine: Arc<Engine<FakeClock>>,
    pub clock: FakeClock,
    pub db: Arc<Database>,
    pub bus: Arc<EventBus>,
    pub git: Arc<GitStore>,
    #[allow(dead_code)]
    pub dir: TempDir,
}

/// Full in-process stack with repo `r1` seeded on `main` and the
/// database persisted to a real file.
pub async fn stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let db = Arc::new(Database::open(&dir.path().join("laf.db")).unwrap());
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
        logs,
        git: Arc::clone(&git),
        bus: Arc::clone(&bus),
        http_base: "http://127.0.0.1:7780".to_string(),
    });

    Stack {
        engine,
        clock,
        db,
        bus,
        git,
        dir,
    }
}

/// A simulated runner on the far end of a real wire-protocol channel.
pub struct RunnerClient {
    stream: tokio::io::DuplexStream,
}

impl RunnerClient {
    /// Open a connection, complete the hello handshake, and wait for
    /// the registry to admit the runner.
    pub async fn connect(stack: &Stack, id: &str, runner_type: &str) -> Self {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        tokio::spawn(runner_listener::handle_connection(
            server_read,
            server_write,
            Arc::clone(&stack.engine),
        ));

        let mut this = Self { stream: client };
        this.send(&RunnerMsg::Hello(runner_hello_with_id(id, id, runner_type)))
            .await;

        let runner_id = laf_core::RunnerId::new(id);
        wait_for(
            || stack.engine.runner(&runner_id).is_some(),
            "runner registration",
        )
        .await;
        this
    }

    pub async fn send(&mut self, msg: &RunnerMsg) {
        let data = protocol_wire::encode(msg).unwrap();
        protocol_wire::write_message(&mut self.stream, &data).await.unwrap();
    }

    /// Next non-ping frame from the control plane.
    pub async fn recv(&mut self) -> ServerMsg {
        loop {
            let bytes = tokio::time::timeout(
                Duration::from_secs(5),
                protocol_wire::read_message(&mut self.stream),
            )
            .await
            .expect("timed out waiting for server frame")
            .unwrap();
            let msg: ServerMsg = protocol_wire::decode(&bytes).unwrap();
            if !matches!(msg, ServerMsg::Ping { .. }) {
                return msg;
            }
        }
    }

    /// Wait for an `AssignStep` and return its step id.
    pub async fn expect_assign(&mut self) -> StepId {
        match self.recv().await {
            ServerMsg::AssignStep { step_id, .. } => step_id,
            other => panic!("expected assign_step, got {other:?}"),
        }
    }

    pub async fn ack(&mut self, step_id: &StepId) {
        self.send(&RunnerMsg::AckStep {
            step_id: step_id.clone(),
        })
        .await;
    }

    pub async fn logs(&mut self, step_id: &StepId, lines: &[&str]) {
        self.send(&RunnerMsg::StepLogs {
            step_id: step_id.clone(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        })
        .await;
    }

    pub async fn finish(&mut self, step_id: &StepId, status: StepResultStatus) {
        self.send(&RunnerMsg::StepResult {
            step_id: step_id.clone(),
            status,
            exit_code: Some(if status == StepResultStatus::Completed { 0 } else { 1 }),
            error: None,
            produced_diff: None,
            produced_branch: None,
            files_changed: None,
        })
        .await;
    }
}

/// Poll until `cond` holds; the fake clock governs deadlines only.
pub async fn wait_for(cond: impl Fn() -> bool, what: &str) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
