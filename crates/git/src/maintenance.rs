// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Administrative recovery: ref reconciliation, orphan cleanup, and
//! destructive reinitialization.

use crate::cmd::{git, git_ok, GitError};
use crate::store::GitStore;
use crate::types::SyncReport;
use laf_core::RepoId;
use tracing::{info, warn};

impl GitStore {
    /// Scan refs, prune branches whose tips are unreachable objects,
    /// and re-verify the survivors.
    ///
    /// The default branch is never pruned, even when damaged; it is
    /// reported with its missing SHAs so the operator can push to
    /// repair or reinitialize.
    pub async fn sync_from_disk(&self, repo_id: &RepoId) -> Result<SyncReport, GitError> {
        let repo = self.repo(repo_id)?;
        let _guard = repo.write_lock.lock().await;

        let mut report = SyncReport::default();
        for branch in repo.branches(true).await? {
            let tip_exists = git(&repo.bare_dir, &["cat-file", "-e", &branch.commit_sha])
                .await?
                .success();
            if !tip_exists && branch.name != repo.default_branch {
                warn!(
                    repo = %repo_id,
                    branch = %branch.name,
                    sha = %branch.commit_sha,
                    "pruning branch with unreachable tip"
                );
                git_ok(
                    &repo.bare_dir,
                    &["update-ref", "-d", &format!("refs/heads/{}", branch.name)],
                )
                .await?;
                report.pruned.push(branch.name);
                continue;
            }
            report.branches.push(branch);
        }
        Ok(report)
    }

    /// Remove stale worktree registrations and leftover worktree
    /// directories not tied to an in-progress conflicted operation.
    pub async fn cleanup_orphans(&self, repo_id: &RepoId) -> Result<u32, GitError> {
        let repo = self.repo(repo_id)?;
        let _guard = repo.write_lock.lock().await;

        git_ok(&repo.bare_dir, &["worktree", "prune"]).await?;

        let keep = crate::merge::pending_worktrees(self, repo_id);
        let mut removed = 0u32;
        let Ok(entries) = std::fs::read_dir(&repo.worktrees_dir) else {
            return Ok(0);
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if keep.iter().any(|k| k == &path) {
                continue;
            }
            repo.remove_worktree_dir(&path).await;
            removed += 1;
        }
        if removed > 0 {
            info!(repo = %repo_id, removed, "cleaned up orphan worktrees");
        }
        Ok(removed)
    }

    /// Destroy all refs and objects and re-seed an empty default
    /// branch. Irreversible; the caller gates this behind explicit
    /// confirmation.
    pub async fn reinitialize(&self, repo_id: &RepoId, confirm: bool) -> Result<(), GitError> {
        if !confirm {
            return Err(GitError::Refused {
                action: "reinitialize".to_string(),
                reason: "destroys all refs and objects; requires confirmation".to_string(),
            });
        }
        let repo = self.repo(repo_id)?;
        let default_branch = repo.default_branch.clone();
        {
            let _guard = repo.write_lock.lock().await;
            self.pending_ops.lock().retain(|_, op| &op.repo_id != repo_id);
            let dir = self.root().join(repo_id.as_str());
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        warn!(repo = %repo_id, "reinitialized repository; all refs and objects destroyed");
        self.init_repo(repo_id, &default_branch).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
