// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step dispatcher: matches ready steps against eligible idle runners
//! with deterministic ordering and a two-phase assign→ack handoff.
//!
//! The dispatcher never polls. It wakes on ready steps, on runners
//! returning to idle, on acks, and on ack-deadline expiry.

use crate::engine::RunRouter;
use crate::executor::ExecutorInput;
use crate::registry::{AckOutcome, RegistryError, RunnerRegistry};
use crate::scheduler::{Deadline, Scheduler};
use laf_core::{
    Clock, RepoSnapshot, RouteSelector, RunId, RunnerId, ServerMsg, StepId, StepKind,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Everything the dispatcher needs to hand a step to a runner.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub run_id: RunId,
    pub run_created_at_ms: u64,
    pub step_id: StepId,
    pub step_index: u32,
    pub kind: StepKind,
    pub config: serde_json::Value,
    pub selector: RouteSelector,
    pub timeout_s: u64,
    pub repo_snapshot: RepoSnapshot,
    pub prior_context: Option<String>,
}

/// Inputs to the dispatcher task.
#[derive(Debug)]
pub enum DispatchMsg {
    /// A step entered the ready set.
    StepReady(DispatchRequest),
    /// Steps left the ready set (cancelled or failed elsewhere).
    Forget { step_ids: Vec<StepId> },
    /// A runner returned to idle; re-pump the ready set.
    RunnerIdle,
    /// A runner acked a step.
    Ack { runner_id: RunnerId, step_id: StepId },
    /// The ack deadline for an assignment expired.
    AckTimeout { runner_id: RunnerId, step_id: StepId },
    /// A runner died or disconnected while holding a step.
    RunnerGone { runner_id: RunnerId, step_id: StepId },
}

/// Ready-set ordering: (run-created-at, step-index) with the step id as
/// a stable final tie-break. Older runs dispatch first.
type ReadyKey = (u64, u32, StepId);

struct ReadyEntry {
    request: DispatchRequest,
    /// Runners that already timed out on this step; retries must use
    /// distinct runners.
    tried: HashSet<RunnerId>,
    attempts: u32,
}

struct Pending {
    runner_id: RunnerId,
    entry: ReadyEntry,
}

/// The dispatcher task.
pub struct Dispatcher<C: Clock> {
    registry: Arc<RunnerRegistry<C>>,
    router: Arc<RunRouter>,
    scheduler: Arc<Mutex<Scheduler>>,
    clock: C,
    ack_timeout: std::time::Duration,
    max_assign_retries: u32,
    ready: BTreeMap<ReadyKey, ReadyEntry>,
    pending: HashMap<StepId, Pending>,
    rx: mpsc::Receiver<DispatchMsg>,
}

impl<C: Clock> Dispatcher<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<RunnerRegistry<C>>,
        router: Arc<RunRouter>,
        scheduler: Arc<Mutex<Scheduler>>,
        clock: C,
        ack_timeout: std::time::Duration,
        max_assign_retries: u32,
        rx: mpsc::Receiver<DispatchMsg>,
    ) -> Self {
        Self {
            registry,
            router,
            scheduler,
            clock,
            ack_timeout,
            max_assign_retries,
            ready: BTreeMap::new(),
            pending: HashMap::new(),
            rx,
        }
    }

    /// Run until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.handle(msg).await;
        }
    }

    async fn handle(&mut self, msg: DispatchMsg) {
        match msg {
            DispatchMsg::StepReady(request) => {
                let key = ready_key(&request);
                self.ready.insert(
                    key,
                    ReadyEntry {
                        request,
                        tried: HashSet::new(),
                        attempts: 0,
                    },
                );
                self.pump().await;
            }

            DispatchMsg::Forget { step_ids } => {
                for step_id in step_ids {
                    self.ready.retain(|_, e| e.request.step_id != step_id);
                    if self.pending.remove(&step_id).is_some() {
                        self.scheduler.lock().cancel(&format!("ack:{step_id}"));
                    }
                }
            }

            DispatchMsg::RunnerIdle => self.pump().await,

            DispatchMsg::Ack { runner_id, step_id } => {
                self.on_ack(runner_id, step_id).await;
            }

            DispatchMsg::AckTimeout { runner_id, step_id } => {
                self.on_ack_timeout(runner_id, step_id).await;
            }

            DispatchMsg::RunnerGone { runner_id, step_id } => {
                // Mid-handoff death: roll the step back to ready like
                // an ack timeout. Acked steps are the executor's
                // concern and arrive there via the run router.
                if self.pending.contains_key(&step_id) {
                    self.on_ack_timeout(runner_id, step_id).await;
                } else {
                    self.router
                        .send_to_step(&step_id, ExecutorInput::RunnerDied { step_id: step_id.clone() })
                        .await;
                }
            }
        }
    }

    /// Serve the ready set in order, assigning every step that has an
    /// eligible idle runner. Steps without one simply stay ready.
    async fn pump(&mut self) {
        let keys: Vec<ReadyKey> = self.ready.keys().cloned().collect();
        for key in keys {
            let Some(entry) = self.ready.get(&key) else {
                continue;
            };
            let Some(runner_id) = self.select_runner(entry) else {
                continue;
            };
            if let Some(entry) = self.ready.remove(&key) {
                self.assign(runner_id, entry).await;
            }
        }
    }

    /// Deterministic selection among eligible idle runners: earliest
    /// `last_idle_since` first, lexicographic runner id as the final
    /// tie-break.
    fn select_runner(&self, entry: &ReadyEntry) -> Option<RunnerId> {
        self.registry
            .idle_runners()
            .into_iter()
            .filter(|(runner, _)| !entry.tried.contains(&runner.id))
            .filter(|(runner, _)| runner.matches(&entry.request.selector))
            .min_by(|(a, a_idle), (b, b_idle)| a_idle.cmp(b_idle).then(a.id.cmp(&b.id)))
            .map(|(runner, _)| runner.id)
    }

    /// Phase one: atomically reserve the runner and mark the step
    /// dispatched, then send `AssignStep` and arm the ack deadline.
    async fn assign(&mut self, runner_id: RunnerId, entry: ReadyEntry) {
        let request = entry.request.clone();
        let step_id = request.step_id.clone();

        let sink = match self.registry.assign(&runner_id, &step_id) {
            Ok(sink) => sink,
            Err(e) => {
                // The runner changed state between snapshot and
                // reservation; put the step back and re-pump later.
                debug!(runner = %runner_id, step = %step_id, error = %e, "assign raced, requeueing");
                self.ready.insert(ready_key(&request), entry);
                return;
            }
        };

        self.router
            .send_to_run(
                &request.run_id,
                ExecutorInput::Dispatched {
                    step_id: step_id.clone(),
                    runner_id: runner_id.clone(),
                },
            )
            .await;

        self.scheduler.lock().set(
            Deadline::AckTimeout {
                run_id: request.run_id.clone(),
                step_id: step_id.clone(),
                runner_id: runner_id.clone(),
            },
            self.ack_timeout,
            self.clock.now(),
        );

        let msg = ServerMsg::AssignStep {
            step_id: step_id.clone(),
            run_id: request.run_id.clone(),
            repo_snapshot: request.repo_snapshot.clone(),
            kind: request.kind,
            config: request.config.clone(),
            timeout_s: request.timeout_s,
            prior_context: request.prior_context.clone(),
        };

        info!(step = %step_id, runner = %runner_id, "dispatching step");
        if let Err(e) = sink.send(msg).await {
            warn!(step = %step_id, runner = %runner_id, error = %e, "assign send failed, rolling back");
            self.scheduler.lock().cancel(&format!("ack:{step_id}"));
            self.registry.release(&runner_id);
            self.rollback(runner_id, entry).await;
            return;
        }

        self.pending.insert(step_id, Pending { runner_id, entry });
    }

    /// Phase two: the runner confirmed the handoff.
    async fn on_ack(&mut self, runner_id: RunnerId, step_id: StepId) {
        match self.registry.ack(&runner_id, &step_id) {
            Ok(AckOutcome::Accepted) => {
                self.scheduler.lock().cancel(&format!("ack:{step_id}"));
                if let Some(pending) = self.pending.remove(&step_id) {
                    self.router
                        .send_to_run(
                            &pending.entry.request.run_id,
                            ExecutorInput::Acked {
                                step_id: step_id.clone(),
                            },
                        )
                        .await;
                }
            }
            // Re-issued ack for a handed-off step: no-op.
            Ok(AckOutcome::Duplicate) => {}
            Err(RegistryError::StaleAck { .. }) | Err(RegistryError::InvalidState { .. }) => {
                // The assignment was rolled back (or never existed);
                // the runner must drop the step and return to idle.
                if let Some(sink) = self.registry.sink(&runner_id) {
                    let _ = sink
                        .send(ServerMsg::AbortStep {
                            step_id,
                            reason: "assignment no longer exists".to_string(),
                        })
                        .await;
                }
            }
            Err(e) => warn!(runner = %runner_id, step = %step_id, error = %e, "ack rejected"),
        }
    }

    async fn on_ack_timeout(&mut self, runner_id: RunnerId, step_id: StepId) {
        let Some(pending) = self.pending.remove(&step_id) else {
            return;
        };
        if pending.runner_id != runner_id {
            // Stale deadline from an earlier attempt.
            self.pending.insert(step_id, pending);
            return;
        }
        self.scheduler.lock().cancel(&format!("ack:{step_id}"));
        self.registry.release(&runner_id);
        self.rollback(runner_id, pending.entry).await;
        self.pump().await;
    }

    /// Record the failed attempt; either requeue for a distinct runner
    /// or surface exhaustion to the executor.
    async fn rollback(&mut self, runner_id: RunnerId, mut entry: ReadyEntry) {
        entry.tried.insert(runner_id);
        entry.attempts += 1;
        let request = entry.request.clone();

        if entry.attempts >= self.max_assign_retries {
            warn!(step = %request.step_id, attempts = entry.attempts, "assign retries exhausted");
            self.router
                .send_to_run(
                    &request.run_id,
                    ExecutorInput::AssignExhausted {
                        step_id: request.step_id.clone(),
                    },
                )
                .await;
            return;
        }

        self.router
            .send_to_run(
                &request.run_id,
                ExecutorInput::DispatchRolledBack {
                    step_id: request.step_id.clone(),
                    attempts: entry.attempts,
                },
            )
            .await;
        self.ready.insert(ready_key(&request), entry);
    }
}

fn ready_key(request: &DispatchRequest) -> ReadyKey {
    (
        request.run_created_at_ms,
        request.step_index,
        request.step_id.clone(),
    )
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
