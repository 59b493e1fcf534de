// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debug sessions: out-of-band supervision of a run with breakpoints.
//!
//! A session pauses its run at configured step indices; the paused
//! step's worktree is exposed to the attached client through a
//! workspace handle. Expiry transitions the session to `timeout` and
//! releases the paused step as cancelled.

use crate::engine::RunRouter;
use crate::executor::ExecutorInput;
use crate::scheduler::{Deadline, Scheduler};
use laf_bus::EventBus;
use laf_core::{
    Clock, Config, DebugSession, DebugSessionId, DebugState, Event, IdGen, RunId, UuidIdGen,
};
use laf_storage::Database;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::EngineError;

/// Manages the debug-session lifecycle.
pub struct DebugManager<C: Clock> {
    db: Arc<Database>,
    bus: Arc<EventBus>,
    scheduler: Arc<Mutex<Scheduler>>,
    router: Arc<RunRouter>,
    clock: C,
    default_ttl: Duration,
    extension: Duration,
}

impl<C: Clock> DebugManager<C> {
    pub fn new(
        db: Arc<Database>,
        bus: Arc<EventBus>,
        scheduler: Arc<Mutex<Scheduler>>,
        router: Arc<RunRouter>,
        clock: C,
        config: &Config,
    ) -> Self {
        Self {
            db,
            bus,
            scheduler,
            router,
            clock,
            default_ttl: Duration::from_secs(config.debug_session_default_ttl_s),
            extension: Duration::from_secs(config.debug_session_extension_s),
        }
    }

    /// Create a session bound to a run. A run may hold at most one
    /// non-terminal session.
    pub fn create(
        &self,
        run_id: RunId,
        breakpoints: BTreeSet<u32>,
    ) -> Result<DebugSession, EngineError> {
        if let Some(existing) = self.db.active_debug_session_for_run(&run_id)? {
            return Err(EngineError::DebugSessionExists {
                run: run_id.to_string(),
                session: existing.id.to_string(),
            });
        }

        let now_ms = self.clock.epoch_ms();
        let session = DebugSession {
            id: DebugSessionId::new(UuidIdGen.next()),
            run_id,
            token: mint_token(),
            state: DebugState::Pending,
            expires_at_ms: now_ms + self.default_ttl.as_millis() as u64,
            breakpoints,
            paused_step: None,
            created_at_ms: now_ms,
        };
        self.db.insert_debug_session(&session)?;
        self.scheduler.lock().set(
            Deadline::DebugExpiry {
                session_id: session.id.clone(),
            },
            self.default_ttl,
            self.clock.now(),
        );
        self.publish_state(&session);
        info!(session = %session.id, run = %session.run_id, "debug session created");
        Ok(session)
    }

    /// Attach an external client using the session token.
    pub fn attach(&self, id: &DebugSessionId, token: &str) -> Result<DebugSession, EngineError> {
        let mut session = self.get(id)?;
        if session.token != token || session.is_terminal() {
            return Err(EngineError::DebugInvalidState {
                session: id.to_string(),
                state: session.state.to_string(),
            });
        }
        session.state = DebugState::Connected;
        self.db.update_debug_session(&session)?;
        self.publish_state(&session);
        Ok(session)
    }

    /// Release the paused step and let the run continue.
    pub async fn resume(&self, id: &DebugSessionId) -> Result<DebugSession, EngineError> {
        let mut session = self.get(id)?;
        if session.is_terminal() {
            return Err(EngineError::DebugInvalidState {
                session: id.to_string(),
                state: session.state.to_string(),
            });
        }
        session.state = DebugState::Resumed;
        session.paused_step = None;
        self.db.update_debug_session(&session)?;
        self.publish_state(&session);
        self.router
            .send_to_run(
                &session.run_id,
                ExecutorInput::DebugResume {
                    session_id: session.id.clone(),
                },
            )
            .await;
        Ok(session)
    }

    /// Abort the session; the paused step is released as cancelled.
    pub async fn abort(&self, id: &DebugSessionId) -> Result<DebugSession, EngineError> {
        self.terminate(id, DebugState::Aborted).await
    }

    /// Close a session normally (its run finished).
    pub async fn end_for_run(&self, run_id: &RunId) {
        if let Ok(Some(session)) = self.db.active_debug_session_for_run(run_id) {
            let _ = self.terminate(&session.id, DebugState::Ended).await;
        }
    }

    /// Scheduler-driven expiry.
    pub async fn expire(&self, id: &DebugSessionId) {
        let _ = self.terminate(id, DebugState::Timeout).await;
    }

    /// Extend the expiry by the configured quantum, bounded to one
    /// quantum past now.
    pub fn extend(&self, id: &DebugSessionId) -> Result<DebugSession, EngineError> {
        let mut session = self.get(id)?;
        if session.is_terminal() {
            return Err(EngineError::DebugInvalidState {
                session: id.to_string(),
                state: session.state.to_string(),
            });
        }
        let now_ms = self.clock.epoch_ms();
        let cap = now_ms + self.extension.as_millis() as u64;
        session.expires_at_ms = (session.expires_at_ms + self.extension.as_millis() as u64).min(cap);
        self.db.update_debug_session(&session)?;

        let remaining = session.expires_at_ms.saturating_sub(now_ms);
        self.scheduler.lock().set(
            Deadline::DebugExpiry {
                session_id: session.id.clone(),
            },
            Duration::from_millis(remaining),
            self.clock.now(),
        );
        Ok(session)
    }

    /// The executor paused its run at a breakpoint.
    pub fn on_run_paused(&self, run_id: &RunId, step_index: u32) {
        if let Ok(Some(mut session)) = self.db.active_debug_session_for_run(run_id) {
            session.state = DebugState::WaitingAtBp;
            session.paused_step = Some(step_index);
            if self.db.update_debug_session(&session).is_ok() {
                self.publish_state(&session);
            }
        }
    }

    /// A runner-side breakpoint report.
    pub fn on_breakpoint(&self, id: &DebugSessionId, step_index: u32, workspace_handle: String) {
        if let Ok(mut session) = self.get(id) {
            if session.is_terminal() {
                return;
            }
            session.state = DebugState::WaitingAtBp;
            session.paused_step = Some(step_index);
            if self.db.update_debug_session(&session).is_ok() {
                self.publish_state(&session);
                self.bus.publish(Event::DebugBreakpoint {
                    session_id: id.clone(),
                    step_index,
                    workspace_handle,
                });
            }
        }
    }

    pub fn get(&self, id: &DebugSessionId) -> Result<DebugSession, EngineError> {
        self.db
            .get_debug_session(id)?
            .ok_or_else(|| EngineError::DebugSessionNotFound(id.to_string()))
    }

    /// Startup sweep: sessions already past expiry transition to
    /// timeout; the rest get their expiry timers re-armed.
    pub fn rearm_at_boot(&self) -> Result<(), EngineError> {
        let now_ms = self.clock.epoch_ms();
        for mut session in self.db.active_debug_sessions()? {
            if session.is_expired(now_ms) {
                session.state = DebugState::Timeout;
                self.db.update_debug_session(&session)?;
                self.publish_state(&session);
                continue;
            }
            let remaining = session.expires_at_ms - now_ms;
            self.scheduler.lock().set(
                Deadline::DebugExpiry {
                    session_id: session.id.clone(),
                },
                Duration::from_millis(remaining),
                self.clock.now(),
            );
        }
        Ok(())
    }

    async fn terminate(
        &self,
        id: &DebugSessionId,
        state: DebugState,
    ) -> Result<DebugSession, EngineError> {
        let mut session = self.get(id)?;
        if session.is_terminal() {
            return Ok(session);
        }
        session.state = state;
        self.db.update_debug_session(&session)?;
        self.scheduler.lock().cancel(&format!("debug:{id}"));
        self.publish_state(&session);
        self.router
            .send_to_run(
                &session.run_id,
                ExecutorInput::DebugReleased {
                    session_id: session.id.clone(),
                },
            )
            .await;
        info!(session = %id, %state, "debug session terminated");
        Ok(session)
    }

    fn publish_state(&self, session: &DebugSession) {
        self.bus.publish(Event::DebugStatus {
            session_id: session.id.clone(),
            state: session.state,
        });
    }
}

/// 32-hex-char bearer token.
fn mint_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[path = "debug_tests.rs"]
mod tests;
