// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forward-only schema migrations.
//!
//! The database records its schema version in `schema_version`; opening
//! a database applies every migration past the recorded version inside
//! a single transaction per step.

use rusqlite::Connection;

/// Ordered DDL batches. Index 0 is version 1.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema mirroring the core entities
    r#"
    CREATE TABLE repos (
        id             TEXT PRIMARY KEY,
        name           TEXT NOT NULL UNIQUE,
        default_branch TEXT NOT NULL,
        clone_token    TEXT NOT NULL,
        created_at_ms  INTEGER NOT NULL
    );

    CREATE TABLE cards (
        id            TEXT PRIMARY KEY,
        repo_id       TEXT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
        title         TEXT NOT NULL,
        description   TEXT NOT NULL DEFAULT '',
        status        TEXT NOT NULL,
        branch        TEXT NOT NULL,
        run_id        TEXT,
        created_at_ms INTEGER NOT NULL
    );
    CREATE INDEX idx_cards_repo ON cards(repo_id);

    CREATE TABLE pipelines (
        id            TEXT PRIMARY KEY,
        repo_id       TEXT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
        name          TEXT NOT NULL,
        definition    TEXT NOT NULL,
        created_at_ms INTEGER NOT NULL
    );
    CREATE INDEX idx_pipelines_repo ON pipelines(repo_id);

    CREATE TABLE runs (
        id              TEXT PRIMARY KEY,
        pipeline_id     TEXT,
        repo_id         TEXT NOT NULL,
        state           TEXT NOT NULL,
        trigger_json    TEXT NOT NULL,
        steps_total     INTEGER NOT NULL,
        steps_completed INTEGER NOT NULL DEFAULT 0,
        current_index   INTEGER NOT NULL DEFAULT 0,
        created_at_ms   INTEGER NOT NULL,
        finished_at_ms  INTEGER,
        error           TEXT,
        working_branch  TEXT NOT NULL,
        crashed         INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX idx_runs_repo ON runs(repo_id);
    CREATE INDEX idx_runs_state ON runs(state);

    CREATE TABLE steps (
        id                  TEXT PRIMARY KEY,
        run_id              TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
        idx                 INTEGER NOT NULL,
        name                TEXT NOT NULL,
        kind                TEXT NOT NULL,
        config              TEXT NOT NULL,
        selector            TEXT NOT NULL,
        state               TEXT NOT NULL,
        exit_code           INTEGER,
        error               TEXT,
        assigned_runner     TEXT,
        started_at_ms       INTEGER,
        finished_at_ms      INTEGER,
        continue_in_context INTEGER NOT NULL DEFAULT 0,
        timeout_s           INTEGER NOT NULL,
        assign_attempts     INTEGER NOT NULL DEFAULT 0,
        log_tail            TEXT NOT NULL DEFAULT '[]'
    );
    CREATE INDEX idx_steps_run ON steps(run_id, idx);

    CREATE TABLE debug_sessions (
        id            TEXT PRIMARY KEY,
        run_id        TEXT NOT NULL,
        token         TEXT NOT NULL,
        state         TEXT NOT NULL,
        expires_at_ms INTEGER NOT NULL,
        breakpoints   TEXT NOT NULL DEFAULT '[]',
        paused_step   INTEGER,
        created_at_ms INTEGER NOT NULL
    );
    CREATE INDEX idx_debug_run ON debug_sessions(run_id);
    "#,
];

/// Current schema version.
pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}

/// Apply any outstanding migrations. Returns the resulting version.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })?;

    for (i, ddl) in MIGRATIONS.iter().enumerate() {
        let version = i as u32 + 1;
        if version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(ddl)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tx.commit()?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(latest_version().max(current))
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
