// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.

use thiserror::Error;

/// Errors surfaced by the engine to its callers.
///
/// The executor itself never propagates errors across the run
/// boundary: internal faults become step failures or terminal run
/// states. These variants cover the request surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown run: {0}")]
    RunNotFound(String),

    #[error("unknown pipeline: {0}")]
    PipelineNotFound(String),

    #[error("unknown repo: {0}")]
    RepoNotFound(String),

    #[error("run {0} is already terminal")]
    RunTerminal(String),

    #[error("run {run} already has a live debug session {session}")]
    DebugSessionExists { run: String, session: String },

    #[error("unknown debug session: {0}")]
    DebugSessionNotFound(String),

    #[error("invalid debug transition: session {session} is {state}")]
    DebugInvalidState { session: String, state: String },

    #[error("invalid pipeline graph: {0}")]
    Graph(#[from] laf_core::graph::GraphError),

    #[error("storage error: {0}")]
    Storage(#[from] laf_storage::StorageError),

    #[error("git error: {0}")]
    Git(#[from] laf_git::GitError),

    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),
}
