// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner registry and heartbeat monitor.
//!
//! The authoritative set of connected runners, their capabilities and
//! liveness. State transitions of a single runner serialize behind the
//! registry lock; every transition is published on the runner's topic.

use crate::sink::RunnerSink;
use laf_bus::EventBus;
use laf_core::{Clock, Event, IdGen, Runner, RunnerHello, RunnerId, RunnerState, StepId, UuidIdGen};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("runner id {0} is already connected")]
    DuplicateRegistration(String),

    #[error("unknown runner: {0}")]
    UnknownRunner(String),

    #[error("runner {runner} is {state}, expected {expected}")]
    InvalidState {
        runner: String,
        state: String,
        expected: String,
    },

    #[error("runner {runner} acked step {step} but holds {holds}")]
    StaleAck {
        runner: String,
        step: String,
        holds: String,
    },
}

/// Outcome of an ack.
#[derive(Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// First ack: the runner moved to busy.
    Accepted,
    /// Re-delivered ack for the step the runner already holds; a no-op.
    Duplicate,
}

/// Runners that died or were evicted during a tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Dead runners with the step each one held, if any.
    pub died: Vec<(RunnerId, Option<StepId>)>,
    pub evicted: Vec<RunnerId>,
}

struct RunnerEntry {
    runner: Runner,
    sink: Option<Arc<dyn RunnerSink>>,
    last_seen: Instant,
    idle_since: Instant,
    dead_since: Option<Instant>,
}

/// Process-singleton runner registry.
pub struct RunnerRegistry<C: Clock> {
    clock: C,
    bus: Arc<EventBus>,
    heartbeat_deadline: Duration,
    retention: Duration,
    inner: Mutex<HashMap<RunnerId, RunnerEntry>>,
}

impl<C: Clock> RunnerRegistry<C> {
    pub fn new(
        clock: C,
        bus: Arc<EventBus>,
        heartbeat_deadline: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            clock,
            bus,
            heartbeat_deadline,
            retention,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a runner from its hello frame.
    ///
    /// A known id that is dead or disconnected is revived in place; a
    /// currently connected id is rejected. An absent id mints a fresh
    /// one.
    pub fn register(
        &self,
        hello: RunnerHello,
        sink: Arc<dyn RunnerSink>,
    ) -> Result<Runner, RegistryError> {
        let now = self.clock.now();
        let epoch_ms = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let id = match &hello.runner_id {
            Some(proposed) => {
                let id = RunnerId::new(proposed.clone());
                if let Some(entry) = inner.get(&id) {
                    if !matches!(
                        entry.runner.state,
                        RunnerState::Dead | RunnerState::Disconnected
                    ) {
                        return Err(RegistryError::DuplicateRegistration(proposed.clone()));
                    }
                }
                id
            }
            None => RunnerId::new(UuidIdGen.next()),
        };

        let mut runner = Runner::admit(id.clone(), hello, epoch_ms);
        self.bus.publish(Event::RunnerRegistered {
            id: id.clone(),
            name: runner.name.clone(),
            runner_type: runner.runner_type.clone(),
            labels: runner.labels.clone(),
        });

        // connecting → idle happens as part of admission; the two
        // transitions are published in order.
        self.publish_status(&runner);
        runner.state = RunnerState::Idle;
        runner.idle_since_ms = epoch_ms;
        self.publish_status(&runner);

        info!(runner = %id, runner_type = %runner.runner_type, "runner registered");
        inner.insert(
            id,
            RunnerEntry {
                runner: runner.clone(),
                sink: Some(sink),
                last_seen: now,
                idle_since: now,
                dead_since: None,
            },
        );
        Ok(runner)
    }

    /// Record traffic from a runner; resets the death timer.
    pub fn heartbeat(&self, id: &RunnerId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get_mut(id) {
            entry.last_seen = self.clock.now();
            entry.runner.last_heartbeat_ms = self.clock.epoch_ms();
        }
    }

    /// Explicit close of a runner's channel. Returns the step the
    /// runner held, which fails via the runner-death path.
    pub fn disconnect(&self, id: &RunnerId) -> Option<StepId> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(id)?;
        if matches!(
            entry.runner.state,
            RunnerState::Dead | RunnerState::Disconnected
        ) {
            return None;
        }
        let held = entry.runner.current_step.take();
        entry.runner.state = RunnerState::Disconnected;
        entry.sink = None;
        self.publish_status(&entry.runner);
        info!(runner = %id, "runner disconnected");
        held
    }

    /// Reserve an idle runner for a step (dispatcher only).
    pub fn assign(
        &self,
        id: &RunnerId,
        step_id: &StepId,
    ) -> Result<Arc<dyn RunnerSink>, RegistryError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownRunner(id.to_string()))?;
        if entry.runner.state != RunnerState::Idle {
            return Err(RegistryError::InvalidState {
                runner: id.to_string(),
                state: entry.runner.state.to_string(),
                expected: "idle".to_string(),
            });
        }
        let sink = entry
            .sink
            .clone()
            .ok_or_else(|| RegistryError::UnknownRunner(id.to_string()))?;
        entry.runner.state = RunnerState::Assigned;
        entry.runner.current_step = Some(step_id.clone());
        self.publish_status(&entry.runner);
        Ok(sink)
    }

    /// Move an assigned runner to busy on ack. Duplicate acks for the
    /// held step are no-ops; acks for anything else are stale.
    pub fn ack(&self, id: &RunnerId, step_id: &StepId) -> Result<AckOutcome, RegistryError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownRunner(id.to_string()))?;

        match (&entry.runner.state, &entry.runner.current_step) {
            (RunnerState::Assigned, Some(held)) if held == step_id => {
                entry.runner.state = RunnerState::Busy;
                self.publish_status(&entry.runner);
                Ok(AckOutcome::Accepted)
            }
            (RunnerState::Busy, Some(held)) if held == step_id => Ok(AckOutcome::Duplicate),
            (_, held) => Err(RegistryError::StaleAck {
                runner: id.to_string(),
                step: step_id.to_string(),
                holds: held
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "nothing".to_string()),
            }),
        }
    }

    /// Return a runner to idle, clearing its step pointer. Legal from
    /// any active state; a no-op for dead/disconnected runners.
    pub fn release(&self, id: &RunnerId) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(id) else {
            return;
        };
        if !entry.runner.state.is_active() {
            return;
        }
        entry.runner.state = RunnerState::Idle;
        entry.runner.current_step = None;
        entry.runner.idle_since_ms = self.clock.epoch_ms();
        entry.idle_since = self.clock.now();
        self.publish_status(&entry.runner);
    }

    /// Drive heartbeat deadlines. A deadline exactly met counts as
    /// alive; strictly exceeded counts as dead. Runners dead longer
    /// than the retention window are evicted.
    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::default();
        let mut inner = self.inner.lock();

        for entry in inner.values_mut() {
            let state = entry.runner.state;
            if matches!(state, RunnerState::Dead | RunnerState::Disconnected) {
                continue;
            }
            let silent_for = now.saturating_duration_since(entry.last_seen);
            if silent_for > self.heartbeat_deadline {
                let held = entry.runner.current_step.take();
                entry.runner.state = RunnerState::Dead;
                entry.dead_since = Some(now);
                entry.sink = None;
                self.publish_status(&entry.runner);
                warn!(runner = %entry.runner.id, ?held, "runner missed heartbeat deadline");
                report.died.push((entry.runner.id.clone(), held));
            }
        }

        let retention = self.retention;
        let mut evicted = Vec::new();
        inner.retain(|id, entry| {
            let expired = entry
                .dead_since
                .is_some_and(|t| now.saturating_duration_since(t) > retention);
            if expired {
                evicted.push(id.clone());
            }
            !expired
        });
        for id in evicted {
            self.bus.publish(Event::RunnerEvicted { id: id.clone() });
            info!(runner = %id, "runner evicted after retention window");
            report.evicted.push(id);
        }
        report
    }

    /// Snapshot of every registered runner.
    pub fn snapshot(&self) -> Vec<Runner> {
        self.inner.lock().values().map(|e| e.runner.clone()).collect()
    }

    pub fn get(&self, id: &RunnerId) -> Option<Runner> {
        self.inner.lock().get(id).map(|e| e.runner.clone())
    }

    /// Write half of a connected runner's channel.
    pub fn sink(&self, id: &RunnerId) -> Option<Arc<dyn RunnerSink>> {
        self.inner.lock().get(id).and_then(|e| e.sink.clone())
    }

    /// Idle runners with their idle-since instants, for deterministic
    /// dispatch selection.
    pub fn idle_runners(&self) -> Vec<(Runner, Instant)> {
        self.inner
            .lock()
            .values()
            .filter(|e| e.runner.state.is_idle())
            .map(|e| (e.runner.clone(), e.idle_since))
            .collect()
    }

    fn publish_status(&self, runner: &Runner) {
        self.bus.publish(Event::RunnerStatus {
            id: runner.id.clone(),
            state: runner.state,
            step_id: runner.current_step.clone(),
        });
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
