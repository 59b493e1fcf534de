// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree pool.
//!
//! Worktrees are leased to a step for the duration of its execution,
//! keyed by `(branch, run_id, step_index)`, and either destroyed on
//! release or preserved for the next step when the leasing step carries
//! `continue_in_context`.

use crate::cmd::{git, git_ok, GitError};
use crate::store::RepoHandle;
use laf_core::RunId;
use std::path::PathBuf;

/// A checked-out working copy leased from the bare repository.
#[derive(Debug)]
pub struct WorktreeLease {
    pub path: PathBuf,
    pub branch: String,
    pub run_id: RunId,
    pub step_index: u32,
}

impl RepoHandle {
    fn step_worktree_path(&self, run_id: &RunId, step_index: u32) -> PathBuf {
        self.worktrees_dir.join(format!("{run_id}-{step_index}"))
    }

    /// Lease a worktree for a step, detached at the branch tip.
    ///
    /// Detached checkouts keep the branch free for concurrent leases
    /// and for merge worktrees, which need the branch itself.
    pub async fn lease_worktree(
        &self,
        branch: &str,
        run_id: &RunId,
        step_index: u32,
    ) -> Result<WorktreeLease, GitError> {
        let sha = self.branch_sha(branch).await?;
        let path = self.step_worktree_path(run_id, step_index);
        if path.exists() {
            self.remove_worktree_dir(&path).await;
        }
        let _guard = self.write_lock.lock().await;
        let path_str = path.to_string_lossy().into_owned();
        git_ok(
            &self.bare_dir,
            &["worktree", "add", "--detach", &path_str, &sha],
        )
        .await?;
        Ok(WorktreeLease {
            path,
            branch: branch.to_string(),
            run_id: run_id.clone(),
            step_index,
        })
    }

    /// Return a lease. Preserved worktrees stay on disk for the next
    /// sequentially-dispatched step; others are destroyed.
    pub async fn release_worktree(&self, lease: WorktreeLease, preserve: bool) {
        if preserve {
            return;
        }
        self.remove_worktree_dir(&lease.path).await;
    }

    /// Path of a preserved worktree from an earlier step of the run,
    /// if one exists at or before `upto_index` (nearest first).
    pub fn preserved_worktree(&self, run_id: &RunId, upto_index: u32) -> Option<PathBuf> {
        (0..=upto_index)
            .rev()
            .map(|i| self.step_worktree_path(run_id, i))
            .find(|p| p.exists())
    }

    /// Destroy every worktree belonging to a run.
    pub async fn destroy_run_worktrees(&self, run_id: &RunId) {
        let prefix = format!("{run_id}-");
        let Ok(entries) = std::fs::read_dir(&self.worktrees_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                self.remove_worktree_dir(&entry.path()).await;
            }
        }
    }

    /// Best-effort `git worktree remove --force` plus directory cleanup.
    pub(crate) async fn remove_worktree_dir(&self, path: &std::path::Path) {
        let path_str = path.to_string_lossy().into_owned();
        let _ = git(&self.bare_dir, &["worktree", "remove", "--force", &path_str]).await;
        if path.exists() {
            let _ = std::fs::remove_dir_all(path);
        }
    }
}

#[cfg(test)]
#[path = "worktree_tests.rs"]
mod tests;
