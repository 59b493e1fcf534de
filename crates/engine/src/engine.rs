// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine facade: wires the registry, dispatcher, and per-run
//! executors together, routes runner traffic, and recovers persisted
//! state at boot.

use crate::debug::DebugManager;
use crate::dispatcher::{DispatchMsg, Dispatcher};
use crate::error::EngineError;
use crate::executor::{ExecCtx, ExecutorInput, RunExecutor};
use crate::registry::RunnerRegistry;
use crate::scheduler::{Deadline, Scheduler};
use crate::sink::RunnerSink;
use laf_bus::EventBus;
use laf_core::{
    CardStatus, Clock, Config, Event, IdGen, PipelineDefinition, PipelineRun, RepoId, Runner,
    RunnerHello, RunnerId, RunnerMsg, RunId, RunState, Step, StepId, StepState, Trigger, UuidIdGen,
};
use laf_git::GitStore;
use laf_storage::{Database, LogStore};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Mailbox depth per run and for the dispatcher.
const MAILBOX_DEPTH: usize = 128;

/// Routes inputs to per-run executor mailboxes.
#[derive(Default)]
pub struct RunRouter {
    runs: Mutex<HashMap<RunId, mpsc::Sender<ExecutorInput>>>,
    steps: Mutex<HashMap<StepId, RunId>>,
}

impl RunRouter {
    pub fn register_run(&self, run: &PipelineRun, tx: mpsc::Sender<ExecutorInput>) {
        self.runs.lock().insert(run.id.clone(), tx);
        let mut steps = self.steps.lock();
        for step in &run.steps {
            steps.insert(step.id.clone(), run.id.clone());
        }
    }

    pub fn remove_run(&self, run_id: &RunId) {
        self.runs.lock().remove(run_id);
        self.steps.lock().retain(|_, r| r != run_id);
    }

    pub async fn send_to_run(&self, run_id: &RunId, input: ExecutorInput) {
        let tx = self.runs.lock().get(run_id).cloned();
        if let Some(tx) = tx {
            if tx.send(input).await.is_err() {
                warn!(run = %run_id, "run mailbox closed");
            }
        }
    }

    pub async fn send_to_step(&self, step_id: &StepId, input: ExecutorInput) {
        let run_id = self.steps.lock().get(step_id).cloned();
        if let Some(run_id) = run_id {
            self.send_to_run(&run_id, input).await;
        }
    }

    pub fn run_for_step(&self, step_id: &StepId) -> Option<RunId> {
        self.steps.lock().get(step_id).cloned()
    }

    pub fn is_live(&self, run_id: &RunId) -> bool {
        self.runs.lock().contains_key(run_id)
    }
}

/// Callbacks from executors to the engine.
#[derive(Debug)]
pub enum EngineNotice {
    RunFinished {
        run_id: RunId,
        state: RunState,
        error: Option<String>,
    },
    RunPausedAtBreakpoint {
        run_id: RunId,
        step_index: u32,
    },
}

/// Everything the engine is built from.
pub struct EngineDeps<C: Clock> {
    pub config: Config,
    pub clock: C,
    pub db: Arc<Database>,
    pub logs: Arc<LogStore>,
    pub git: Arc<GitStore>,
    pub bus: Arc<EventBus>,
    /// Base URL clone endpoints are minted under.
    pub http_base: String,
}

/// A request to start a pipeline run.
pub struct StartRunRequest {
    pub repo_id: RepoId,
    pub definition: PipelineDefinition,
    pub trigger: Trigger,
}

/// The execution core.
pub struct Engine<C: Clock> {
    ctx: Arc<ExecCtx<C>>,
    registry: Arc<RunnerRegistry<C>>,
    scheduler: Arc<Mutex<Scheduler>>,
    router: Arc<RunRouter>,
    debug: DebugManager<C>,
    dispatcher_tx: mpsc::Sender<DispatchMsg>,
    clock: C,
    config: Config,
}

impl<C: Clock> Engine<C> {
    /// Build the engine and spawn its dispatcher and notice loops.
    pub fn new(deps: EngineDeps<C>) -> Arc<Self> {
        let registry = Arc::new(RunnerRegistry::new(
            deps.clock.clone(),
            Arc::clone(&deps.bus),
            deps.config.heartbeat_deadline(),
            Duration::from_secs(deps.config.runner_retention_s),
        ));
        let scheduler = Arc::new(Mutex::new(Scheduler::new()));
        let router = Arc::new(RunRouter::default());
        let (dispatcher_tx, dispatcher_rx) = mpsc::channel(MAILBOX_DEPTH);
        let (notice_tx, notice_rx) = mpsc::channel(MAILBOX_DEPTH);

        let ctx = Arc::new(ExecCtx {
            db: Arc::clone(&deps.db),
            logs: Arc::clone(&deps.logs),
            git: Arc::clone(&deps.git),
            bus: Arc::clone(&deps.bus),
            registry: Arc::clone(&registry),
            scheduler: Arc::clone(&scheduler),
            clock: deps.clock.clone(),
            http_base: deps.http_base.clone(),
            dispatcher: dispatcher_tx.clone(),
            notices: notice_tx,
        });

        let debug = DebugManager::new(
            Arc::clone(&deps.db),
            Arc::clone(&deps.bus),
            Arc::clone(&scheduler),
            Arc::clone(&router),
            deps.clock.clone(),
            &deps.config,
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&scheduler),
            deps.clock.clone(),
            deps.config.assign_ack_timeout(),
            deps.config.max_assign_retries,
            dispatcher_rx,
        );
        tokio::spawn(dispatcher.run());

        let engine = Arc::new(Self {
            ctx,
            registry,
            scheduler,
            router,
            debug,
            dispatcher_tx,
            clock: deps.clock,
            config: deps.config,
        });

        let notice_engine = Arc::clone(&engine);
        tokio::spawn(async move {
            notice_engine.notice_loop(notice_rx).await;
        });

        engine
    }

    /// Spawn the periodic tick loop (heartbeats + deadlines). Tests
    /// drive [`Self::tick_now`] directly instead.
    pub fn spawn_tick_loop(self: &Arc<Self>, period: Duration) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                engine.tick_now().await;
            }
        });
    }

    /// One monotonic tick: runner heartbeat deadlines, then engine
    /// timer deadlines.
    pub async fn tick_now(&self) {
        let report = self.registry.tick();
        for (runner_id, held_step) in report.died {
            if let Some(step_id) = held_step {
                self.dispatcher_tx
                    .send(DispatchMsg::RunnerGone { runner_id, step_id })
                    .await
                    .ok();
            }
        }

        let fired = self.scheduler.lock().fired(self.clock.now());
        for deadline in fired {
            match deadline {
                Deadline::AckTimeout {
                    step_id, runner_id, ..
                } => {
                    self.dispatcher_tx
                        .send(DispatchMsg::AckTimeout { runner_id, step_id })
                        .await
                        .ok();
                }
                Deadline::StepTimeout { run_id, step_id } => {
                    self.router
                        .send_to_run(&run_id, ExecutorInput::StepTimedOut { step_id })
                        .await;
                }
                Deadline::StepGrace { run_id, step_id } => {
                    self.router
                        .send_to_run(&run_id, ExecutorInput::GraceExpired { step_id })
                        .await;
                }
                Deadline::DebugExpiry { session_id } => {
                    self.debug.expire(&session_id).await;
                }
            }
        }
    }

    // ── runner channel ──────────────────────────────────────────────────

    /// First-frame registration of a runner connection.
    pub fn on_runner_connected(
        &self,
        hello: RunnerHello,
        sink: Arc<dyn RunnerSink>,
    ) -> Result<Runner, EngineError> {
        Ok(self.registry.register(hello, sink)?)
    }

    /// Route one inbound frame. Any traffic counts as a heartbeat.
    pub async fn on_runner_msg(&self, runner_id: &RunnerId, msg: RunnerMsg) {
        self.registry.heartbeat(runner_id);
        match msg {
            RunnerMsg::Hello(_) => {
                warn!(runner = %runner_id, "unexpected hello after registration");
            }
            RunnerMsg::AckStep { step_id } => {
                self.dispatcher_tx
                    .send(DispatchMsg::Ack {
                        runner_id: runner_id.clone(),
                        step_id,
                    })
                    .await
                    .ok();
            }
            RunnerMsg::StepLogs { step_id, lines } => {
                self.append_logs(&step_id, lines);
            }
            RunnerMsg::StepResult {
                step_id,
                status,
                exit_code,
                error,
                produced_diff,
                produced_branch,
                files_changed: _,
            } => {
                self.router
                    .send_to_step(
                        &step_id,
                        ExecutorInput::StepResult {
                            step_id: step_id.clone(),
                            status,
                            exit_code,
                            error,
                            produced_diff,
                            produced_branch,
                        },
                    )
                    .await;
            }
            RunnerMsg::Pong { .. } => {}
            RunnerMsg::DebugAtBreakpoint {
                session_id,
                step_index,
                workspace_handle,
            } => {
                self.debug
                    .on_breakpoint(&session_id, step_index, workspace_handle);
            }
        }
    }

    /// Explicit close of a runner connection.
    pub async fn on_runner_disconnected(&self, runner_id: &RunnerId) {
        if let Some(step_id) = self.registry.disconnect(runner_id) {
            self.dispatcher_tx
                .send(DispatchMsg::RunnerGone {
                    runner_id: runner_id.clone(),
                    step_id,
                })
                .await
                .ok();
        }
    }

    fn append_logs(&self, step_id: &StepId, lines: Vec<String>) {
        // Durable log first, then best-effort fan-out; bus-side loss
        // never loses the persisted record.
        if let Some(run_id) = self.router.run_for_step(step_id) {
            if let Some(index) = self.step_index(&run_id, step_id) {
                if let Err(e) = self.ctx.logs.append(&run_id, index, &lines) {
                    warn!(step = %step_id, error = %e, "failed to persist step logs");
                }
            }
        }
        self.ctx.bus.publish(Event::StepLogs {
            step_id: step_id.clone(),
            lines,
        });
    }

    fn step_index(&self, run_id: &RunId, step_id: &StepId) -> Option<u32> {
        self.ctx
            .db
            .get_step(step_id)
            .ok()
            .flatten()
            .filter(|s| &s.run_id == run_id)
            .map(|s| s.index)
    }

    // ── runs ────────────────────────────────────────────────────────────

    /// Validate the definition, materialize step records, persist the
    /// run, and spawn its executor.
    pub async fn start_run(&self, request: StartRunRequest) -> Result<RunId, EngineError> {
        request.definition.validate()?;
        let repo = self
            .ctx
            .db
            .get_repo(&request.repo_id)?
            .ok_or_else(|| EngineError::RepoNotFound(request.repo_id.to_string()))?;

        // The working branch must exist before steps snapshot it.
        let handle = self.ctx.git.repo(&request.repo_id)?;
        handle
            .ensure_branch(&request.trigger.branch, &repo.default_branch)
            .await?;

        let now_ms = self.clock.epoch_ms();
        let run_id = RunId::new(UuidIdGen.next());
        let steps = materialize_steps(&run_id, &request.definition, &self.config);
        let working_branch = request.trigger.branch.clone();

        let run = PipelineRun {
            id: run_id.clone(),
            pipeline_id: Some(request.definition.id.clone()),
            repo_id: request.repo_id.clone(),
            state: RunState::Running,
            trigger: request.trigger,
            steps_total: steps.len() as u32,
            steps_completed: 0,
            current_index: 0,
            created_at_ms: now_ms,
            finished_at_ms: None,
            error: None,
            working_branch,
            crashed: false,
            steps,
        };

        self.ctx.db.insert_run(&run)?;
        self.ctx.bus.publish(Event::RunCreated {
            id: run.id.clone(),
            repo_id: run.repo_id.clone(),
            branch: run.working_branch.clone(),
            commit_sha: run.trigger.commit_sha.clone(),
            steps_total: run.steps_total,
        });

        self.spawn_executor(run, request.definition);
        Ok(run_id)
    }

    /// Cancel a live run.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<(), EngineError> {
        if !self.router.is_live(run_id) {
            return Err(EngineError::RunNotFound(run_id.to_string()));
        }
        self.router.send_to_run(run_id, ExecutorInput::CancelRun).await;
        Ok(())
    }

    /// Resume every non-terminal persisted run by rebuilding its
    /// frontier, and re-arm debug expiries.
    pub async fn recover(&self) -> Result<u32, EngineError> {
        self.debug.rearm_at_boot()?;

        let runs = self.ctx.db.non_terminal_runs()?;
        let mut resumed = 0;
        for run in runs {
            if run.crashed {
                warn!(run = %run.id, "skipping crashed run; operator intervention required");
                continue;
            }
            let def = match self.definition_for(&run)? {
                Some(def) => def,
                None => {
                    warn!(run = %run.id, "pipeline definition missing; cannot resume");
                    continue;
                }
            };
            info!(run = %run.id, "resuming non-terminal run");
            self.spawn_executor(run, def);
            resumed += 1;
        }
        Ok(resumed)
    }

    fn definition_for(&self, run: &PipelineRun) -> Result<Option<PipelineDefinition>, EngineError> {
        match &run.pipeline_id {
            Some(id) => Ok(self.ctx.db.get_pipeline(id)?),
            None => Ok(None),
        }
    }

    fn spawn_executor(&self, run: PipelineRun, def: PipelineDefinition) {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        self.router.register_run(&run, tx.clone());
        let executor = RunExecutor::new(Arc::clone(&self.ctx), run, def, rx, tx);
        tokio::spawn(executor.run());
    }

    /// Executor callbacks.
    async fn notice_loop(self: Arc<Self>, mut rx: mpsc::Receiver<EngineNotice>) {
        while let Some(notice) = rx.recv().await {
            match notice {
                EngineNotice::RunFinished { run_id, state, .. } => {
                    self.router.remove_run(&run_id);
                    self.debug.end_for_run(&run_id).await;
                    if let Err(e) = self.update_card_for_run(&run_id, state) {
                        warn!(run = %run_id, error = %e, "failed to update card after run");
                    }
                }
                EngineNotice::RunPausedAtBreakpoint { run_id, step_index } => {
                    self.debug.on_run_paused(&run_id, step_index);
                }
            }
        }
    }

    /// Card workflow coupling: a passed run moves its card to review,
    /// a failed or cancelled one marks it failed.
    fn update_card_for_run(&self, run_id: &RunId, state: RunState) -> Result<(), EngineError> {
        let Some(run) = self.ctx.db.get_run(run_id)? else {
            return Ok(());
        };
        let Some(card_id) = run.trigger.card_id else {
            return Ok(());
        };
        let Some(mut card) = self.ctx.db.get_card(&card_id)? else {
            return Ok(());
        };

        let next = match state {
            RunState::Passed => CardStatus::InReview,
            RunState::Failed | RunState::Cancelled => CardStatus::Failed,
            RunState::Running => return Ok(()),
        };
        if card.status.can_move_to(next) {
            card.status = next;
            self.ctx.db.update_card(&card)?;
            self.ctx.bus.publish(Event::CardStatusChanged {
                repo_id: card.repo_id.clone(),
                card_id: card.id.clone(),
                status: card.status,
            });
        }
        Ok(())
    }

    // ── accessors for the surface layer ────────────────────────────────

    pub fn runners(&self) -> Vec<Runner> {
        self.registry.snapshot()
    }

    pub fn runner(&self, id: &RunnerId) -> Option<Runner> {
        self.registry.get(id)
    }

    pub fn debug_sessions(&self) -> &DebugManager<C> {
        &self.debug
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.ctx.bus
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.ctx.db
    }

    pub fn git(&self) -> &Arc<GitStore> {
        &self.ctx.git
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.ctx.logs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mint a deterministic clone token for a new repo.
    pub fn mint_clone_token(repo_id: &RepoId, boot_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(repo_id.as_str().as_bytes());
        hasher.update(boot_secret.as_bytes());
        let digest = hasher.finalize();
        digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
    }

    /// Is a run currently live in the executor registry?
    pub fn is_run_live(&self, run_id: &RunId) -> bool {
        self.router.is_live(run_id)
    }
}

/// Build step records from a definition, in declaration order.
fn materialize_steps(run_id: &RunId, def: &PipelineDefinition, config: &Config) -> Vec<Step> {
    def.steps
        .iter()
        .enumerate()
        .map(|(index, (name, template))| Step {
            id: StepId::new(UuidIdGen.next()),
            run_id: run_id.clone(),
            index: index as u32,
            name: name.clone(),
            kind: template.kind,
            config: template.config.clone(),
            selector: template.selector.clone(),
            state: StepState::Pending,
            exit_code: None,
            error: None,
            assigned_runner: None,
            started_at_ms: None,
            finished_at_ms: None,
            continue_in_context: template.continue_in_context,
            timeout_s: template.timeout_s.unwrap_or(config.step_default_timeout_s),
            assign_attempts: 0,
            log_tail: Vec::new(),
        })
        .collect()
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
