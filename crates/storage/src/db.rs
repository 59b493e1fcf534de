// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relational entity store.
//!
//! SQLite behind a mutex-guarded connection. Every method is a short,
//! committed transaction; no transaction is ever held across network or
//! subprocess I/O. The database is the source of truth for everything
//! except git state, which lives on disk.

use laf_core::{
    Card, CardId, DebugSession, DebugSessionId, PipelineDefinition, PipelineId, PipelineRun, Repo,
    RepoId, RunId, Step, StepId,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Errors from the entity store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("encoding error: {0}")]
    Encode(String),
}

/// Encode a unit enum as its serde string form.
fn to_text<T: Serialize>(v: &T) -> Result<String, StorageError> {
    match serde_json::to_value(v)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StorageError::Encode(format!(
            "expected string encoding, got {other}"
        ))),
    }
}

/// Decode a unit enum from its serde string form, inside a row closure.
fn sql_decode<T: DeserializeOwned>(idx: usize, s: String) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(s)).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Decode a JSON column, inside a row closure.
fn sql_decode_json<T: DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Mutex-guarded SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and apply migrations.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Encode(e.to_string()))?;
        }
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Lock contention is transient: wait it out instead of
        // surfacing SQLITE_BUSY to callers.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        crate::migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        crate::migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── repos ───────────────────────────────────────────────────────────

    pub fn insert_repo(&self, repo: &Repo) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO repos (id, name, default_branch, clone_token, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                repo.id.as_str(),
                repo.name,
                repo.default_branch,
                repo.clone_token,
                repo.created_at_ms
            ],
        )?;
        Ok(())
    }

    pub fn get_repo(&self, id: &RepoId) -> Result<Option<Repo>, StorageError> {
        let conn = self.conn.lock();
        let repo = conn
            .query_row(
                "SELECT id, name, default_branch, clone_token, created_at_ms
                 FROM repos WHERE id = ?1",
                [id.as_str()],
                row_to_repo,
            )
            .optional()?;
        Ok(repo)
    }

    pub fn list_repos(&self) -> Result<Vec<Repo>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, default_branch, clone_token, created_at_ms
             FROM repos ORDER BY created_at_ms",
        )?;
        let repos = stmt
            .query_map([], row_to_repo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(repos)
    }

    pub fn delete_repo(&self, id: &RepoId) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM repos WHERE id = ?1", [id.as_str()])?;
        Ok(n > 0)
    }

    // ── cards ───────────────────────────────────────────────────────────

    pub fn insert_card(&self, card: &Card) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cards (id, repo_id, title, description, status, branch, run_id, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                card.id.as_str(),
                card.repo_id.as_str(),
                card.title,
                card.description,
                to_text(&card.status)?,
                card.branch,
                card.run_id.as_ref().map(|r| r.as_str()),
                card.created_at_ms
            ],
        )?;
        Ok(())
    }

    pub fn update_card(&self, card: &Card) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE cards SET title = ?2, description = ?3, status = ?4, branch = ?5, run_id = ?6
             WHERE id = ?1",
            params![
                card.id.as_str(),
                card.title,
                card.description,
                to_text(&card.status)?,
                card.branch,
                card.run_id.as_ref().map(|r| r.as_str())
            ],
        )?;
        Ok(())
    }

    pub fn get_card(&self, id: &CardId) -> Result<Option<Card>, StorageError> {
        let conn = self.conn.lock();
        let card = conn
            .query_row(
                "SELECT id, repo_id, title, description, status, branch, run_id, created_at_ms
                 FROM cards WHERE id = ?1",
                [id.as_str()],
                row_to_card,
            )
            .optional()?;
        Ok(card)
    }

    pub fn list_cards(&self, repo_id: &RepoId) -> Result<Vec<Card>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, repo_id, title, description, status, branch, run_id, created_at_ms
             FROM cards WHERE repo_id = ?1 ORDER BY created_at_ms",
        )?;
        let cards = stmt
            .query_map([repo_id.as_str()], row_to_card)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cards)
    }

    pub fn delete_card(&self, id: &CardId) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM cards WHERE id = ?1", [id.as_str()])?;
        Ok(n > 0)
    }

    // ── pipelines ───────────────────────────────────────────────────────

    pub fn insert_pipeline(
        &self,
        def: &PipelineDefinition,
        created_at_ms: u64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pipelines (id, repo_id, name, definition, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                def.id.as_str(),
                def.repo_id.as_str(),
                def.name,
                serde_json::to_string(def)?,
                created_at_ms
            ],
        )?;
        Ok(())
    }

    pub fn update_pipeline(&self, def: &PipelineDefinition) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE pipelines SET name = ?2, definition = ?3 WHERE id = ?1",
            params![def.id.as_str(), def.name, serde_json::to_string(def)?],
        )?;
        Ok(())
    }

    pub fn get_pipeline(&self, id: &PipelineId) -> Result<Option<PipelineDefinition>, StorageError> {
        let conn = self.conn.lock();
        let def = conn
            .query_row(
                "SELECT definition FROM pipelines WHERE id = ?1",
                [id.as_str()],
                |row| {
                    let raw: String = row.get(0)?;
                    sql_decode_json(0, &raw)
                },
            )
            .optional()?;
        Ok(def)
    }

    pub fn list_pipelines(&self, repo_id: &RepoId) -> Result<Vec<PipelineDefinition>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT definition FROM pipelines WHERE repo_id = ?1 ORDER BY created_at_ms",
        )?;
        let defs = stmt
            .query_map([repo_id.as_str()], |row| {
                let raw: String = row.get(0)?;
                sql_decode_json(0, &raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(defs)
    }

    pub fn delete_pipeline(&self, id: &PipelineId) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM pipelines WHERE id = ?1", [id.as_str()])?;
        Ok(n > 0)
    }

    // ── runs ────────────────────────────────────────────────────────────

    /// Persist a new run and its materialized steps atomically.
    pub fn insert_run(&self, run: &PipelineRun) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (id, pipeline_id, repo_id, state, trigger_json, steps_total,
                               steps_completed, current_index, created_at_ms, finished_at_ms,
                               error, working_branch, crashed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run.id.as_str(),
                run.pipeline_id.as_ref().map(|p| p.as_str()),
                run.repo_id.as_str(),
                to_text(&run.state)?,
                serde_json::to_string(&run.trigger)?,
                run.steps_total,
                run.steps_completed,
                run.current_index,
                run.created_at_ms,
                run.finished_at_ms,
                run.error,
                run.working_branch,
                run.crashed as i64
            ],
        )?;
        for step in &run.steps {
            insert_step_tx(&tx, step)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Update the run row (not its steps).
    pub fn update_run(&self, run: &PipelineRun) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runs SET state = ?2, steps_completed = ?3, current_index = ?4,
                             finished_at_ms = ?5, error = ?6, crashed = ?7
             WHERE id = ?1",
            params![
                run.id.as_str(),
                to_text(&run.state)?,
                run.steps_completed,
                run.current_index,
                run.finished_at_ms,
                run.error,
                run.crashed as i64
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, id: &RunId) -> Result<Option<PipelineRun>, StorageError> {
        let conn = self.conn.lock();
        let run = conn
            .query_row(
                "SELECT id, pipeline_id, repo_id, state, trigger_json, steps_total,
                        steps_completed, current_index, created_at_ms, finished_at_ms,
                        error, working_branch, crashed
                 FROM runs WHERE id = ?1",
                [id.as_str()],
                row_to_run,
            )
            .optional()?;
        let Some(mut run) = run else {
            return Ok(None);
        };
        run.steps = query_steps(&conn, &run.id)?;
        Ok(Some(run))
    }

    pub fn list_runs(&self, repo_id: &RepoId, limit: u32) -> Result<Vec<PipelineRun>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, pipeline_id, repo_id, state, trigger_json, steps_total,
                    steps_completed, current_index, created_at_ms, finished_at_ms,
                    error, working_branch, crashed
             FROM runs WHERE repo_id = ?1 ORDER BY created_at_ms DESC LIMIT ?2",
        )?;
        let mut runs = stmt
            .query_map(params![repo_id.as_str(), limit], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for run in &mut runs {
            run.steps = query_steps(&conn, &run.id)?;
        }
        Ok(runs)
    }

    /// Runs to resume at startup, oldest first.
    pub fn non_terminal_runs(&self) -> Result<Vec<PipelineRun>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, pipeline_id, repo_id, state, trigger_json, steps_total,
                    steps_completed, current_index, created_at_ms, finished_at_ms,
                    error, working_branch, crashed
             FROM runs WHERE state = 'running' ORDER BY created_at_ms",
        )?;
        let mut runs = stmt
            .query_map([], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for run in &mut runs {
            run.steps = query_steps(&conn, &run.id)?;
        }
        Ok(runs)
    }

    // ── steps ───────────────────────────────────────────────────────────

    pub fn update_step(&self, step: &Step) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE steps SET state = ?2, exit_code = ?3, error = ?4, assigned_runner = ?5,
                              started_at_ms = ?6, finished_at_ms = ?7, assign_attempts = ?8,
                              log_tail = ?9
             WHERE id = ?1",
            params![
                step.id.as_str(),
                to_text(&step.state)?,
                step.exit_code,
                step.error,
                step.assigned_runner.as_ref().map(|r| r.as_str()),
                step.started_at_ms,
                step.finished_at_ms,
                step.assign_attempts,
                serde_json::to_string(&step.log_tail)?
            ],
        )?;
        Ok(())
    }

    pub fn get_step(&self, id: &StepId) -> Result<Option<Step>, StorageError> {
        let conn = self.conn.lock();
        let step = conn
            .query_row(
                &format!("{STEP_COLUMNS} WHERE id = ?1"),
                [id.as_str()],
                row_to_step,
            )
            .optional()?;
        Ok(step)
    }

    // ── debug sessions ──────────────────────────────────────────────────

    pub fn insert_debug_session(&self, session: &DebugSession) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO debug_sessions (id, run_id, token, state, expires_at_ms, breakpoints,
                                         paused_step, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.id.as_str(),
                session.run_id.as_str(),
                session.token,
                to_text(&session.state)?,
                session.expires_at_ms,
                serde_json::to_string(&session.breakpoints)?,
                session.paused_step,
                session.created_at_ms
            ],
        )?;
        Ok(())
    }

    pub fn update_debug_session(&self, session: &DebugSession) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE debug_sessions SET state = ?2, expires_at_ms = ?3, breakpoints = ?4,
                                       paused_step = ?5
             WHERE id = ?1",
            params![
                session.id.as_str(),
                to_text(&session.state)?,
                session.expires_at_ms,
                serde_json::to_string(&session.breakpoints)?,
                session.paused_step
            ],
        )?;
        Ok(())
    }

    pub fn get_debug_session(
        &self,
        id: &DebugSessionId,
    ) -> Result<Option<DebugSession>, StorageError> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!("{DEBUG_COLUMNS} WHERE id = ?1"),
                [id.as_str()],
                row_to_debug,
            )
            .optional()?;
        Ok(session)
    }

    /// The (at most one) non-terminal session bound to a run.
    pub fn active_debug_session_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Option<DebugSession>, StorageError> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!(
                    "{DEBUG_COLUMNS} WHERE run_id = ?1
                     AND state NOT IN ('aborted', 'timeout', 'ended')"
                ),
                [run_id.as_str()],
                row_to_debug,
            )
            .optional()?;
        Ok(session)
    }

    /// All non-terminal sessions (for expiry sweeps and recovery).
    pub fn active_debug_sessions(&self) -> Result<Vec<DebugSession>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{DEBUG_COLUMNS} WHERE state NOT IN ('aborted', 'timeout', 'ended')"
        ))?;
        let sessions = stmt
            .query_map([], row_to_debug)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }
}

const STEP_COLUMNS: &str = "SELECT id, run_id, idx, name, kind, config, selector, state,
        exit_code, error, assigned_runner, started_at_ms, finished_at_ms,
        continue_in_context, timeout_s, assign_attempts, log_tail FROM steps";

const DEBUG_COLUMNS: &str = "SELECT id, run_id, token, state, expires_at_ms, breakpoints,
        paused_step, created_at_ms FROM debug_sessions";

fn insert_step_tx(tx: &rusqlite::Transaction<'_>, step: &Step) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO steps (id, run_id, idx, name, kind, config, selector, state, exit_code,
                            error, assigned_runner, started_at_ms, finished_at_ms,
                            continue_in_context, timeout_s, assign_attempts, log_tail)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            step.id.as_str(),
            step.run_id.as_str(),
            step.index,
            step.name,
            to_text(&step.kind)?,
            serde_json::to_string(&step.config)?,
            serde_json::to_string(&step.selector)?,
            to_text(&step.state)?,
            step.exit_code,
            step.error,
            step.assigned_runner.as_ref().map(|r| r.as_str()),
            step.started_at_ms,
            step.finished_at_ms,
            step.continue_in_context as i64,
            step.timeout_s,
            step.assign_attempts,
            serde_json::to_string(&step.log_tail)?
        ],
    )?;
    Ok(())
}

fn query_steps(conn: &Connection, run_id: &RunId) -> Result<Vec<Step>, StorageError> {
    let mut stmt = conn.prepare(&format!("{STEP_COLUMNS} WHERE run_id = ?1 ORDER BY idx"))?;
    let steps = stmt
        .query_map([run_id.as_str()], row_to_step)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(steps)
}

fn row_to_repo(row: &Row<'_>) -> rusqlite::Result<Repo> {
    Ok(Repo {
        id: RepoId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        default_branch: row.get(2)?,
        clone_token: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}

fn row_to_card(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: CardId::new(row.get::<_, String>(0)?),
        repo_id: RepoId::new(row.get::<_, String>(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        status: sql_decode(4, row.get::<_, String>(4)?)?,
        branch: row.get(5)?,
        run_id: row.get::<_, Option<String>>(6)?.map(RunId::new),
        created_at_ms: row.get(7)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<PipelineRun> {
    Ok(PipelineRun {
        id: RunId::new(row.get::<_, String>(0)?),
        pipeline_id: row.get::<_, Option<String>>(1)?.map(PipelineId::new),
        repo_id: RepoId::new(row.get::<_, String>(2)?),
        state: sql_decode(3, row.get::<_, String>(3)?)?,
        trigger: sql_decode_json(4, &row.get::<_, String>(4)?)?,
        steps_total: row.get(5)?,
        steps_completed: row.get(6)?,
        current_index: row.get(7)?,
        created_at_ms: row.get(8)?,
        finished_at_ms: row.get(9)?,
        error: row.get(10)?,
        working_branch: row.get(11)?,
        crashed: row.get::<_, i64>(12)? != 0,
        steps: Vec::new(),
    })
}

fn row_to_step(row: &Row<'_>) -> rusqlite::Result<Step> {
    Ok(Step {
        id: StepId::new(row.get::<_, String>(0)?),
        run_id: RunId::new(row.get::<_, String>(1)?),
        index: row.get(2)?,
        name: row.get(3)?,
        kind: sql_decode(4, row.get::<_, String>(4)?)?,
        config: sql_decode_json(5, &row.get::<_, String>(5)?)?,
        selector: sql_decode_json(6, &row.get::<_, String>(6)?)?,
        state: sql_decode(7, row.get::<_, String>(7)?)?,
        exit_code: row.get(8)?,
        error: row.get(9)?,
        assigned_runner: row
            .get::<_, Option<String>>(10)?
            .map(laf_core::RunnerId::new),
        started_at_ms: row.get(11)?,
        finished_at_ms: row.get(12)?,
        continue_in_context: row.get::<_, i64>(13)? != 0,
        timeout_s: row.get(14)?,
        assign_attempts: row.get(15)?,
        log_tail: sql_decode_json(16, &row.get::<_, String>(16)?)?,
    })
}

fn row_to_debug(row: &Row<'_>) -> rusqlite::Result<DebugSession> {
    Ok(DebugSession {
        id: DebugSessionId::new(row.get::<_, String>(0)?),
        run_id: RunId::new(row.get::<_, String>(1)?),
        token: row.get(2)?,
        state: sql_decode(3, row.get::<_, String>(3)?)?,
        expires_at_ms: row.get(4)?,
        breakpoints: sql_decode_json(5, &row.get::<_, String>(5)?)?,
        paused_step: row.get(6)?,
        created_at_ms: row.get(7)?,
    })
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
