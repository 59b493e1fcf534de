// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline executor: one task per run walks the step graph, emits
//! steps to the dispatcher, consumes results, and computes the next
//! frontier.
//!
//! The per-run state machine is single-writer: every external input
//! (dispatch confirmations, step results, cancel requests, runner
//! deaths, timer expiries) funnels through the run's mailbox and is
//! consumed in arrival order.

use crate::dispatcher::{DispatchMsg, DispatchRequest};
use crate::engine::EngineNotice;
use crate::registry::RunnerRegistry;
use crate::scheduler::{Deadline, Scheduler};
use laf_bus::EventBus;
use laf_core::{
    Clock, DebugSessionId, EdgeTarget, Event, PipelineDefinition, PipelineRun, RepoId,
    RepoSnapshot, RunOutcome, RunState, ServerMsg, Step, StepId, StepKind, StepResultStatus,
    StepState,
};
use laf_git::GitStore;
use laf_storage::{Database, LogStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Log lines retained on a failed step for operators.
const FAILURE_TAIL_LINES: usize = 50;

/// Window a cancelled-on-timeout runner gets to confirm before the
/// step is failed regardless of its reply.
const CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Inputs consumed by a run's mailbox.
#[derive(Debug)]
pub enum ExecutorInput {
    /// Dispatcher reserved a runner and sent `AssignStep`.
    Dispatched { step_id: StepId, runner_id: laf_core::RunnerId },
    /// Ack deadline expired; the step is back in the ready set.
    DispatchRolledBack { step_id: StepId, attempts: u32 },
    /// Assign retries exhausted across distinct runners.
    AssignExhausted { step_id: StepId },
    /// The runner confirmed the handoff.
    Acked { step_id: StepId },
    /// Terminal report from the runner (or a synthesized one from an
    /// inline git action).
    StepResult {
        step_id: StepId,
        status: StepResultStatus,
        exit_code: Option<i32>,
        error: Option<String>,
        produced_diff: Option<String>,
        produced_branch: Option<String>,
    },
    /// The runner executing this step died or disconnected.
    RunnerDied { step_id: StepId },
    /// Wall-clock timeout expired for a busy step.
    StepTimedOut { step_id: StepId },
    /// The cancel grace window after a timeout elapsed.
    GraceExpired { step_id: StepId },
    /// External cancellation of the whole run.
    CancelRun,
    /// Debug session released the paused step.
    DebugResume { session_id: DebugSessionId },
    /// Debug session ended (abort or expiry); the paused step is
    /// released as cancelled.
    DebugReleased { session_id: DebugSessionId },
}

/// Shared services handed to every executor.
pub(crate) struct ExecCtx<C: Clock> {
    pub db: Arc<Database>,
    pub logs: Arc<LogStore>,
    pub git: Arc<GitStore>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<RunnerRegistry<C>>,
    pub scheduler: Arc<Mutex<Scheduler>>,
    pub clock: C,
    pub http_base: String,
    pub dispatcher: mpsc::Sender<DispatchMsg>,
    pub notices: mpsc::Sender<EngineNotice>,
}

/// One run's executor task.
pub(crate) struct RunExecutor<C: Clock> {
    ctx: Arc<ExecCtx<C>>,
    run: PipelineRun,
    def: PipelineDefinition,
    rx: mpsc::Receiver<ExecutorInput>,
    self_tx: mpsc::Sender<ExecutorInput>,
    /// Steps held at a debug breakpoint, not yet offered for dispatch.
    held_at_breakpoint: HashSet<StepId>,
    /// Steps whose timeout fired; late results are discarded.
    timed_out: HashSet<StepId>,
    cancelling: bool,
    outcome_failed: bool,
    finished: bool,
}

impl<C: Clock> RunExecutor<C> {
    pub fn new(
        ctx: Arc<ExecCtx<C>>,
        run: PipelineRun,
        def: PipelineDefinition,
        rx: mpsc::Receiver<ExecutorInput>,
        self_tx: mpsc::Sender<ExecutorInput>,
    ) -> Self {
        Self {
            ctx,
            run,
            def,
            rx,
            self_tx,
            held_at_breakpoint: HashSet::new(),
            timed_out: HashSet::new(),
            cancelling: false,
            outcome_failed: false,
            finished: false,
        }
    }

    /// Drive the run to a terminal state.
    pub async fn run(mut self) {
        self.resume().await;
        while !self.finished {
            let Some(input) = self.rx.recv().await else {
                break;
            };
            self.handle(input).await;
        }
    }

    /// Rebuild the frontier from persisted step states. Fresh runs
    /// have every step pending; resumed runs may hold dispatched or
    /// acked steps whose runners are gone after a restart.
    async fn resume(&mut self) {
        let step_ids: Vec<StepId> = self.run.steps.iter().map(|s| s.id.clone()).collect();

        for step_id in &step_ids {
            let state = match self.run.step(step_id) {
                Some(s) => s.state,
                None => continue,
            };
            match state {
                StepState::Dispatched => {
                    // The handoff cannot survive a restart: roll back.
                    self.advance_step(step_id, StepState::Ready).await;
                }
                StepState::Acked | StepState::Completing => {
                    self.finish_step(
                        step_id.clone(),
                        StepState::Failed,
                        None,
                        Some("runner disappeared".to_string()),
                    )
                    .await;
                }
                _ => {}
            }
        }

        // Offer persisted ready steps to the dispatcher.
        for step_id in &step_ids {
            if self.run.step(step_id).map(|s| s.state) == Some(StepState::Ready) {
                self.offer_step(step_id.clone()).await;
            }
        }

        // Fresh run: light up the entry points.
        let no_progress = self
            .run
            .steps
            .iter()
            .all(|s| s.state == StepState::Pending);
        if no_progress {
            let entries: Vec<String> = self.def.entry_points.clone();
            for name in entries {
                if let Some(step_id) = self.step_id_by_name(&name) {
                    self.make_ready(step_id).await;
                }
            }
        }

        self.check_closure().await;
    }

    async fn handle(&mut self, input: ExecutorInput) {
        match input {
            ExecutorInput::Dispatched { step_id, runner_id } => {
                if let Some(step) = self.run.step_mut(&step_id) {
                    step.assigned_runner = Some(runner_id);
                }
                self.advance_step(&step_id, StepState::Dispatched).await;
                if let Some(step) = self.run.step(&step_id) {
                    self.run.current_index = self.run.current_index.max(step.index);
                    self.persist_run();
                }
            }

            ExecutorInput::DispatchRolledBack { step_id, attempts } => {
                if let Some(step) = self.run.step_mut(&step_id) {
                    step.assigned_runner = None;
                    step.assign_attempts = attempts;
                }
                self.advance_step(&step_id, StepState::Ready).await;
            }

            ExecutorInput::AssignExhausted { step_id } => {
                self.finish_step(
                    step_id,
                    StepState::Failed,
                    None,
                    Some("assign timeout: no runner acknowledged the step".to_string()),
                )
                .await;
            }

            ExecutorInput::Acked { step_id } => {
                let timeout_s = match self.run.step(&step_id) {
                    Some(step) if step.state == StepState::Dispatched => step.timeout_s,
                    _ => return,
                };
                if let Some(step) = self.run.step_mut(&step_id) {
                    step.started_at_ms = Some(self.ctx.clock.epoch_ms());
                }
                self.advance_step(&step_id, StepState::Acked).await;
                self.ctx.scheduler.lock().set(
                    Deadline::StepTimeout {
                        run_id: self.run.id.clone(),
                        step_id,
                    },
                    Duration::from_secs(timeout_s),
                    self.ctx.clock.now(),
                );
            }

            ExecutorInput::StepResult {
                step_id,
                status,
                exit_code,
                error,
                produced_diff,
                produced_branch,
            } => {
                if self.timed_out.contains(&step_id)
                    || self.run.step(&step_id).is_none_or(|s| s.is_terminal())
                {
                    // Timed out or already terminal; the reply is discarded.
                    return;
                }
                let terminal = match status {
                    StepResultStatus::Completed => StepState::Completed,
                    StepResultStatus::Failed => StepState::Failed,
                    StepResultStatus::Cancelled => StepState::Cancelled,
                };
                if status == StepResultStatus::Completed {
                    self.integrate_step_output(&step_id, produced_diff, produced_branch)
                        .await;
                }
                self.finish_step(step_id, terminal, exit_code, error).await;
            }

            ExecutorInput::RunnerDied { step_id } => {
                let live = self
                    .run
                    .step(&step_id)
                    .is_some_and(|s| !s.is_terminal());
                if live {
                    self.finish_step(
                        step_id,
                        StepState::Failed,
                        None,
                        Some("runner disappeared".to_string()),
                    )
                    .await;
                }
            }

            ExecutorInput::StepTimedOut { step_id } => {
                let acked = self
                    .run
                    .step(&step_id)
                    .is_some_and(|s| s.state == StepState::Acked);
                if !acked {
                    return;
                }
                self.timed_out.insert(step_id.clone());
                self.send_to_runner(&step_id, ServerMsg::CancelStep {
                    step_id: step_id.clone(),
                })
                .await;
                self.ctx.scheduler.lock().set(
                    Deadline::StepGrace {
                        run_id: self.run.id.clone(),
                        step_id,
                    },
                    CANCEL_GRACE,
                    self.ctx.clock.now(),
                );
            }

            ExecutorInput::GraceExpired { step_id } => {
                let live = self
                    .run
                    .step(&step_id)
                    .is_some_and(|s| !s.is_terminal());
                if live {
                    self.finish_step(
                        step_id,
                        StepState::Failed,
                        None,
                        Some(format!("timeout after {CANCEL_GRACE:?} grace")),
                    )
                    .await;
                }
            }

            ExecutorInput::CancelRun => self.cancel_run().await,

            ExecutorInput::DebugResume { session_id } => {
                let held: Vec<StepId> = self.held_at_breakpoint.drain().collect();
                info!(run = %self.run.id, session = %session_id, held = held.len(), "debug resume");
                for step_id in held {
                    self.offer_step(step_id).await;
                }
            }

            ExecutorInput::DebugReleased { session_id } => {
                // Only a run actually paused at a breakpoint is
                // affected; the paused step is released as cancelled
                // and the run winds down with it.
                if self.held_at_breakpoint.is_empty() {
                    return;
                }
                info!(run = %self.run.id, session = %session_id, "debug session ended; cancelling paused run");
                self.held_at_breakpoint.clear();
                self.cancel_run().await;
            }
        }
    }

    // ── frontier ────────────────────────────────────────────────────────

    /// Transition a step to ready and either execute it inline (git
    /// actions), hold it at a breakpoint, or offer it for dispatch.
    async fn make_ready(&mut self, step_id: StepId) {
        if self.cancelling || self.run.crashed {
            return;
        }
        self.advance_step(&step_id, StepState::Ready).await;

        let (index, kind) = match self.run.step(&step_id) {
            Some(step) => (step.index, step.kind),
            None => return,
        };

        if self.breakpoint_at(index) {
            self.held_at_breakpoint.insert(step_id.clone());
            self.ctx.notices
                .send(EngineNotice::RunPausedAtBreakpoint {
                    run_id: self.run.id.clone(),
                    step_index: index,
                })
                .await
                .ok();
            return;
        }

        if kind == StepKind::GitAction {
            self.execute_git_action(step_id).await;
            return;
        }

        self.offer_step(step_id).await;
    }

    /// Hand a ready step to the dispatcher.
    async fn offer_step(&mut self, step_id: StepId) {
        let Some(request) = self.build_request(&step_id).await else {
            self.finish_step(
                step_id,
                StepState::Failed,
                None,
                Some("failed to snapshot repository state".to_string()),
            )
            .await;
            return;
        };
        self.ctx
            .dispatcher
            .send(DispatchMsg::StepReady(request))
            .await
            .ok();
    }

    async fn build_request(&self, step_id: &StepId) -> Option<DispatchRequest> {
        let step = self.run.step(step_id)?;
        let repo = self.ctx.db.get_repo(&self.run.repo_id).ok()??;
        let handle = self.ctx.git.repo(&self.run.repo_id).ok()?;
        let commit_sha = handle.branch_sha(&self.run.working_branch).await.ok()?;

        Some(DispatchRequest {
            run_id: self.run.id.clone(),
            run_created_at_ms: self.run.created_at_ms,
            step_id: step.id.clone(),
            step_index: step.index,
            kind: step.kind,
            config: step.config.clone(),
            selector: step.selector.clone(),
            timeout_s: step.timeout_s,
            repo_snapshot: RepoSnapshot {
                clone_url: self
                    .ctx
                    .git
                    .clone_url(&self.ctx.http_base, &repo.id, &repo.clone_token),
                git_ref: self.run.working_branch.clone(),
                commit_sha,
            },
            prior_context: self.prior_context_for(step),
        })
    }

    /// Log tail of the nearest earlier continue-in-context step, fed
    /// as "previous output" to AI-typed successors.
    fn prior_context_for(&self, step: &Step) -> Option<String> {
        if step.kind != StepKind::Agent || step.index == 0 {
            return None;
        }
        let predecessor = self
            .run
            .steps
            .iter()
            .filter(|s| s.index < step.index && s.continue_in_context)
            .max_by_key(|s| s.index)?;
        let tail = self
            .ctx
            .logs
            .tail(&self.run.id, predecessor.index, FAILURE_TAIL_LINES);
        if tail.is_empty() {
            None
        } else {
            Some(tail.join("\n"))
        }
    }

    /// Inline merge/rebase step: never dispatched; the git substrate
    /// executes it and the result is synthesized into the mailbox.
    async fn execute_git_action(&mut self, step_id: StepId) {
        let Some(step) = self.run.step(&step_id) else {
            return;
        };
        // Inline actions pass straight to completing on the result.
        let config = step.config.clone();
        let repo_id = self.run.repo_id.clone();
        let working_branch = self.run.working_branch.clone();
        let git = Arc::clone(&self.ctx.git);
        let tx = self.self_tx.clone();

        tokio::spawn(async move {
            let result = run_git_action(&git, &repo_id, &working_branch, &config).await;
            let (status, error) = match result {
                Ok(()) => (StepResultStatus::Completed, None),
                Err(e) => (StepResultStatus::Failed, Some(e)),
            };
            tx.send(ExecutorInput::StepResult {
                step_id,
                status,
                exit_code: None,
                error,
                produced_diff: None,
                produced_branch: None,
            })
            .await
            .ok();
        });
    }

    /// Fold an agent step's output into the working branch: a pushed
    /// branch wins over a diff; a diff is applied as a commit.
    async fn integrate_step_output(
        &mut self,
        step_id: &StepId,
        produced_diff: Option<String>,
        produced_branch: Option<String>,
    ) {
        let Some(step) = self.run.step(step_id) else {
            return;
        };
        if step.kind != StepKind::Agent {
            return;
        }
        let step_name = step.name.clone();

        if produced_branch.is_some() {
            // The runner pushed its work; the receive-pack path already
            // updated refs.
            return;
        }
        let Some(diff) = produced_diff.filter(|d| !d.trim().is_empty()) else {
            return;
        };
        let message = format!("apply agent changes from step {step_name}");
        match self
            .ctx
            .git
            .apply_patch(&self.run.repo_id, &self.run.working_branch, &diff, &message)
            .await
        {
            Ok(sha) => {
                self.ctx.bus.publish(Event::BranchUpdated {
                    repo_id: self.run.repo_id.clone(),
                    branch: self.run.working_branch.clone(),
                    commit_sha: sha,
                });
            }
            Err(e) => {
                warn!(run = %self.run.id, step = %step_id, error = %e, "failed to apply produced diff");
            }
        }
    }

    // ── completion & routing ────────────────────────────────────────────

    /// Move a step through completing into a terminal state, release
    /// its runner, and take its outbound edges.
    async fn finish_step(
        &mut self,
        step_id: StepId,
        terminal: StepState,
        exit_code: Option<i32>,
        error: Option<String>,
    ) {
        let Some(step) = self.run.step(&step_id) else {
            return;
        };
        if step.is_terminal() {
            return;
        }

        // Steps that never reached a runner cancel directly; anything
        // that ran goes through completing so the durable log flush is
        // ordered ahead of the terminal broadcast.
        let direct_cancel = terminal == StepState::Cancelled
            && matches!(
                step.state,
                StepState::Pending | StepState::Ready | StepState::Dispatched
            );
        if !direct_cancel {
            self.advance_step(&step_id, StepState::Completing).await;
        }

        let (index, runner) = match self.run.step_mut(&step_id) {
            Some(step) => {
                step.exit_code = exit_code;
                step.finished_at_ms = Some(self.ctx.clock.epoch_ms());
                if terminal == StepState::Failed {
                    step.error = error.clone();
                }
                (step.index, step.assigned_runner.take())
            }
            None => return,
        };

        if terminal == StepState::Failed {
            let tail = self.ctx.logs.tail(&self.run.id, index, FAILURE_TAIL_LINES);
            if let Some(step) = self.run.step_mut(&step_id) {
                step.log_tail = tail;
            }
        }

        self.ctx.scheduler.lock().cancel_step(&step_id);
        self.timed_out.remove(&step_id);

        if let Some(runner_id) = runner {
            self.ctx.registry.release(&runner_id);
            self.ctx.dispatcher.send(DispatchMsg::RunnerIdle).await.ok();
        }

        self.advance_step(&step_id, terminal).await;
        if terminal == StepState::Completed {
            self.run.steps_completed += 1;
        }
        self.persist_run();

        if !self.cancelling && terminal != StepState::Cancelled {
            Box::pin(self.route_edges(&step_id, terminal == StepState::Completed))
                .await;
        }
        self.check_closure().await;
    }

    /// Take the outbound edges of a terminal step: light up successor
    /// steps whose inbound edges are satisfied, skip unreachable ones,
    /// and execute terminal actions.
    async fn route_edges(&mut self, step_id: &StepId, succeeded: bool) {
        let step_name = match self.run.step(step_id) {
            Some(s) => s.name.clone(),
            None => return,
        };

        for action in self
            .def
            .terminal_actions(&step_name, succeeded)
            .into_iter()
            .cloned()
            .collect::<Vec<EdgeTarget>>()
        {
            self.execute_terminal_action(action).await;
        }

        if !succeeded {
            let has_failure_route = self
                .def
                .edges
                .iter()
                .any(|e| e.from == step_name && e.condition.fires(false));
            if !has_failure_route {
                self.outcome_failed = true;
            }
        }

        // Evaluate readiness for every non-terminal step downstream.
        let candidates: Vec<String> = self
            .def
            .successors(&step_name, succeeded)
            .into_iter()
            .map(String::from)
            .collect();
        for name in candidates {
            self.evaluate_readiness(&name).await;
        }

        // Steps whose inbound edges all resolved without firing can
        // never run; skip them so the run can close. Skipping one step
        // can make its successors skippable, so iterate to fixpoint.
        loop {
            let skippable: Vec<StepId> = self
                .run
                .steps
                .iter()
                .filter(|s| s.state == StepState::Pending)
                .filter(|s| self.inbound_resolved(&s.name) && !self.inbound_fired(&s.name))
                .map(|s| s.id.clone())
                .collect();
            if skippable.is_empty() {
                break;
            }
            for step_id in skippable {
                self.finish_step(step_id, StepState::Cancelled, None, None).await;
            }
        }
    }

    /// Ready means: every inbound edge is resolved (its source step is
    /// terminal) and at least one satisfied edge fired.
    async fn evaluate_readiness(&mut self, name: &str) {
        let pending = self
            .run
            .steps
            .iter()
            .find(|s| s.name == name)
            .filter(|s| s.state == StepState::Pending)
            .map(|s| s.id.clone());
        let Some(step_id) = pending else {
            return;
        };
        if self.inbound_resolved(name) && self.inbound_fired(name) {
            self.make_ready(step_id).await;
        }
    }

    fn inbound_resolved(&self, name: &str) -> bool {
        self.def.inbound(name).iter().all(|edge| {
            self.run
                .steps
                .iter()
                .find(|s| s.name == edge.from)
                .is_some_and(|s| s.is_terminal())
        })
    }

    fn inbound_fired(&self, name: &str) -> bool {
        self.def.inbound(name).iter().any(|edge| {
            self.run
                .steps
                .iter()
                .find(|s| s.name == edge.from)
                .is_some_and(|s| match s.state {
                    StepState::Completed => edge.condition.fires(true),
                    StepState::Failed => edge.condition.fires(false),
                    _ => false,
                })
        })
    }

    async fn execute_terminal_action(&mut self, action: EdgeTarget) {
        match action {
            EdgeTarget::Stop { outcome } => {
                if outcome == RunOutcome::Failed {
                    self.outcome_failed = true;
                }
            }
            EdgeTarget::Merge { branch } => {
                self.merge_working_branch(&branch).await;
            }
            EdgeTarget::Step { .. } => {}
        }
    }

    /// `merge(branch)` leaf: merge the run's working branch into the
    /// target; the run outcome is contingent on merge success.
    async fn merge_working_branch(&mut self, target: &str) {
        let source = self.run.working_branch.clone();
        match self
            .ctx
            .git
            .merge(&self.run.repo_id, &source, target)
            .await
        {
            Ok(result) if result.success => {
                if let Some(sha) = result.new_sha {
                    self.ctx.bus.publish(Event::BranchUpdated {
                        repo_id: self.run.repo_id.clone(),
                        branch: target.to_string(),
                        commit_sha: sha,
                    });
                }
            }
            Ok(result) => {
                self.outcome_failed = true;
                self.run.error = Some(format!(
                    "merge into {target} has {} conflicted file(s)",
                    result.conflicts.len()
                ));
            }
            Err(e) => {
                self.outcome_failed = true;
                self.run.error = Some(format!("merge into {target} failed: {e}"));
            }
        }
    }

    // ── cancellation & closure ──────────────────────────────────────────

    async fn cancel_run(&mut self) {
        if self.cancelling || self.run.is_terminal() {
            return;
        }
        self.cancelling = true;
        info!(run = %self.run.id, "cancelling run");

        let mut forget = Vec::new();
        let snapshot: Vec<(StepId, StepState)> = self
            .run
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.state))
            .collect();

        for (step_id, state) in snapshot {
            match state {
                StepState::Pending | StepState::Ready | StepState::Dispatched => {
                    forget.push(step_id.clone());
                    self.held_at_breakpoint.remove(&step_id);
                    self.finish_step(step_id, StepState::Cancelled, None, None).await;
                }
                StepState::Acked => {
                    self.send_to_runner(&step_id, ServerMsg::CancelStep {
                        step_id: step_id.clone(),
                    })
                    .await;
                }
                _ => {}
            }
        }

        if !forget.is_empty() {
            self.ctx
                .dispatcher
                .send(DispatchMsg::Forget { step_ids: forget })
                .await
                .ok();
        }
        self.check_closure().await;
    }

    /// A run is terminal exactly when every reachable step is.
    async fn check_closure(&mut self) {
        if self.finished || !self.run.all_steps_terminal() {
            return;
        }

        let state = if self.cancelling {
            RunState::Cancelled
        } else if self.outcome_failed {
            RunState::Failed
        } else {
            RunState::Passed
        };

        // Trigger-level termination hooks (card approval merges).
        let hook = match state {
            RunState::Passed => self.run.trigger.on_pass.clone(),
            RunState::Failed => self.run.trigger.on_fail.clone(),
            _ => None,
        };
        if let Some(laf_core::RunHook::Merge { source, target }) = hook {
            match self.ctx.git.merge(&self.run.repo_id, &source, &target).await {
                Ok(result) if result.success => {}
                Ok(result) => {
                    self.run.error = Some(format!(
                        "termination merge into {target} has {} conflicted file(s)",
                        result.conflicts.len()
                    ));
                }
                Err(e) => {
                    self.run.error = Some(format!("termination merge failed: {e}"));
                }
            }
        }

        self.run.state = state;
        self.run.finished_at_ms = Some(self.ctx.clock.epoch_ms());
        self.finished = true;
        self.persist_run();

        self.ctx.bus.publish(Event::RunStatus {
            id: self.run.id.clone(),
            state,
            steps_completed: self.run.steps_completed,
            steps_total: self.run.steps_total,
            error: self.run.error.clone(),
        });

        if let Err(e) = self.ctx.logs.archive_run(&self.run.id) {
            warn!(run = %self.run.id, error = %e, "failed to archive run logs");
        }
        if let Ok(handle) = self.ctx.git.repo(&self.run.repo_id) {
            handle.destroy_run_worktrees(&self.run.id).await;
        }

        info!(run = %self.run.id, %state, steps = self.run.steps_completed, "run finished");
        self.ctx
            .notices
            .send(EngineNotice::RunFinished {
                run_id: self.run.id.clone(),
                state,
                error: self.run.error.clone(),
            })
            .await
            .ok();
    }

    // ── plumbing ────────────────────────────────────────────────────────

    /// Advance a step's state machine, persist it, and broadcast the
    /// transition on the run topic.
    async fn advance_step(&mut self, step_id: &StepId, next: StepState) {
        let run_id = self.run.id.clone();
        let Some(step) = self.run.step_mut(step_id) else {
            return;
        };
        if let Err(e) = step.advance(next) {
            // Monotonicity is an invariant; a violation is a bug, not
            // a recoverable condition. Persist a crash marker and stop
            // dispatching for this run.
            error!(run = %run_id, error = %e, "illegal step transition");
            self.run.crashed = true;
            self.persist_run();
            return;
        }
        let snapshot = (
            step.id.clone(),
            step.index,
            step.state,
            step.exit_code,
            step.error.clone(),
        );
        let step_clone = step.clone();
        if let Err(e) = self.ctx.db.update_step(&step_clone) {
            warn!(run = %run_id, step = %step_id, error = %e, "failed to persist step");
        }
        self.ctx.bus.publish(Event::StepStatus {
            run_id,
            step_id: snapshot.0,
            index: snapshot.1,
            state: snapshot.2,
            exit_code: snapshot.3,
            error: snapshot.4,
        });
    }

    fn persist_run(&self) {
        if let Err(e) = self.ctx.db.update_run(&self.run) {
            warn!(run = %self.run.id, error = %e, "failed to persist run");
        }
    }

    async fn send_to_runner(&self, step_id: &StepId, msg: ServerMsg) {
        let runner = self
            .run
            .step(step_id)
            .and_then(|s| s.assigned_runner.clone());
        if let Some(runner_id) = runner {
            if let Some(sink) = self.ctx.registry.sink(&runner_id) {
                let _ = sink.send(msg).await;
            }
        }
    }

    fn step_id_by_name(&self, name: &str) -> Option<StepId> {
        self.run
            .steps
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id.clone())
    }

    fn breakpoint_at(&self, index: u32) -> bool {
        self.ctx
            .db
            .active_debug_session_for_run(&self.run.id)
            .ok()
            .flatten()
            .is_some_and(|s| s.breakpoints.contains(&index))
    }
}

/// Execute an inline git-action step's configuration.
///
/// Config shape: `{"action": "merge"|"rebase", "target": "<branch>"}`
/// with the run's working branch as the implicit source.
async fn run_git_action(
    git: &GitStore,
    repo_id: &RepoId,
    working_branch: &str,
    config: &serde_json::Value,
) -> Result<(), String> {
    let action = config
        .get("action")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "git action config missing 'action'".to_string())?;
    let target = config
        .get("target")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "git action config missing 'target'".to_string())?;

    match action {
        "merge" => {
            let result = git
                .merge(repo_id, working_branch, target)
                .await
                .map_err(|e| e.to_string())?;
            if result.success {
                Ok(())
            } else {
                Err(format!(
                    "merge into {target} has {} conflicted file(s)",
                    result.conflicts.len()
                ))
            }
        }
        "rebase" => {
            let result = git
                .rebase(repo_id, working_branch, target)
                .await
                .map_err(|e| e.to_string())?;
            if result.success {
                Ok(())
            } else {
                Err(format!(
                    "rebase onto {target} has {} conflicted file(s)",
                    result.conflicts.len()
                ))
            }
        }
        other => Err(format!("unknown git action: {other}")),
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
