// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Merges, rebases, conflict capture, and conflict resolution.
//!
//! Conflicted operations stay in progress inside an ephemeral worktree
//! registered under an op id; `resolve_conflicts` writes the supplied
//! contents and completes the operation. Conflicts are values, not
//! faults: a conflicted merge is a successful call.

use crate::cmd::{git, git_ok, git_rpc, GitError, COMMITTER_ARGS};
use crate::store::{GitStore, PendingOp, RepoHandle};
use crate::types::{
    ConflictDetail, MergeOutcome, MergeResult, PendingOpKind, RebaseResult,
};
use laf_core::{IdGen, RepoId, UuidIdGen};
use std::path::{Path, PathBuf};

impl GitStore {
    /// Merge `source` into `target`, fast-forwarding when possible,
    /// otherwise producing a merge commit. Conflicts are returned as
    /// structured detail with an op id for resolution.
    pub async fn merge(
        &self,
        repo_id: &RepoId,
        source: &str,
        target: &str,
    ) -> Result<MergeResult, GitError> {
        let repo = self.repo(repo_id)?;
        let _guard = repo.write_lock.lock().await;

        let source_sha = repo.branch_sha(source).await?;
        let target_sha = repo.branch_sha(target).await?;

        if is_ancestor(&repo, &source_sha, &target_sha).await? {
            return Ok(MergeResult {
                success: true,
                merge_type: MergeOutcome::AlreadyUpToDate,
                new_sha: Some(target_sha),
                conflicts: Vec::new(),
                op_id: None,
                message: format!("{source} is already contained in {target}"),
            });
        }

        let op_id = UuidIdGen.next();
        let worktree = repo.worktrees_dir.join(format!("merge-{op_id}"));
        checkout_branch_worktree(&repo, &worktree, target).await?;

        let mut args: Vec<&str> = COMMITTER_ARGS.to_vec();
        args.extend(["merge", "--no-edit", source]);
        let out = git(&worktree, &args).await?;

        if out.success() {
            let new_sha = head_sha(&worktree).await?;
            let merge_type = if new_sha == source_sha {
                MergeOutcome::FastForward
            } else {
                MergeOutcome::MergeCommit
            };
            repo.remove_worktree_dir(&worktree).await;
            return Ok(MergeResult {
                success: true,
                merge_type,
                new_sha: Some(new_sha),
                conflicts: Vec::new(),
                op_id: None,
                message: format!("merged {source} into {target}"),
            });
        }

        let conflicts = collect_conflicts(&worktree).await?;
        if conflicts.is_empty() {
            // Not a conflict stop: surface the failure and clean up.
            let _ = git(&worktree, &["merge", "--abort"]).await;
            repo.remove_worktree_dir(&worktree).await;
            return Err(GitError::CommandFailed {
                args: format!("merge {source}"),
                code: out.status_code,
                stderr: out.stderr.trim().to_string(),
            });
        }

        self.pending_ops.lock().insert(
            op_id.clone(),
            PendingOp {
                kind: PendingOpKind::Merge,
                repo_id: repo_id.clone(),
                worktree,
                source: source.to_string(),
                target: target.to_string(),
            },
        );
        Ok(MergeResult {
            success: false,
            merge_type: MergeOutcome::Conflict,
            new_sha: None,
            conflicts,
            op_id: Some(op_id),
            message: format!("merge of {source} into {target} has conflicts"),
        })
    }

    /// Rebase `branch` onto `onto`: fast-forward when possible, else
    /// replay commits with three-way merge.
    pub async fn rebase(
        &self,
        repo_id: &RepoId,
        branch: &str,
        onto: &str,
    ) -> Result<RebaseResult, GitError> {
        let repo = self.repo(repo_id)?;
        let _guard = repo.write_lock.lock().await;

        let branch_sha = repo.branch_sha(branch).await?;
        let onto_sha = repo.branch_sha(onto).await?;

        if is_ancestor(&repo, &onto_sha, &branch_sha).await? {
            return Ok(RebaseResult {
                success: true,
                fast_forward: true,
                new_sha: Some(branch_sha),
                conflicts: Vec::new(),
                op_id: None,
                message: format!("{branch} is already based on {onto}"),
            });
        }
        if is_ancestor(&repo, &branch_sha, &onto_sha).await? {
            git_ok(
                &repo.bare_dir,
                &["update-ref", &format!("refs/heads/{branch}"), &onto_sha],
            )
            .await?;
            return Ok(RebaseResult {
                success: true,
                fast_forward: true,
                new_sha: Some(onto_sha),
                conflicts: Vec::new(),
                op_id: None,
                message: format!("fast-forwarded {branch} to {onto}"),
            });
        }

        let op_id = UuidIdGen.next();
        let worktree = repo.worktrees_dir.join(format!("rebase-{op_id}"));
        checkout_branch_worktree(&repo, &worktree, branch).await?;

        let mut args: Vec<&str> = COMMITTER_ARGS.to_vec();
        args.extend(["rebase", onto]);
        let out = git(&worktree, &args).await?;

        if out.success() {
            let new_sha = head_sha(&worktree).await?;
            repo.remove_worktree_dir(&worktree).await;
            return Ok(RebaseResult {
                success: true,
                fast_forward: false,
                new_sha: Some(new_sha),
                conflicts: Vec::new(),
                op_id: None,
                message: format!("rebased {branch} onto {onto}"),
            });
        }

        let conflicts = collect_conflicts(&worktree).await?;
        if conflicts.is_empty() {
            let _ = git(&worktree, &["rebase", "--abort"]).await;
            repo.remove_worktree_dir(&worktree).await;
            return Err(GitError::CommandFailed {
                args: format!("rebase {onto}"),
                code: out.status_code,
                stderr: out.stderr.trim().to_string(),
            });
        }

        self.pending_ops.lock().insert(
            op_id.clone(),
            PendingOp {
                kind: PendingOpKind::Rebase,
                repo_id: repo_id.clone(),
                worktree,
                source: branch.to_string(),
                target: onto.to_string(),
            },
        );
        Ok(RebaseResult {
            success: false,
            fast_forward: false,
            new_sha: None,
            conflicts,
            op_id: Some(op_id),
            message: format!("rebase of {branch} onto {onto} has conflicts"),
        })
    }

    /// Apply user-supplied contents to an in-progress merge/rebase and
    /// complete it. Every currently conflicted path must be covered.
    ///
    /// A rebase may stop at a later commit with fresh conflicts; those
    /// are returned under the same op id.
    pub async fn resolve_conflicts(
        &self,
        repo_id: &RepoId,
        op_id: &str,
        resolutions: &[(String, String)],
    ) -> Result<MergeResult, GitError> {
        let repo = self.repo(repo_id)?;
        let _guard = repo.write_lock.lock().await;

        let (kind, worktree, source, target) = {
            let ops = self.pending_ops.lock();
            let op = ops
                .get(op_id)
                .ok_or_else(|| GitError::PendingOpNotFound(op_id.to_string()))?;
            (
                op.kind,
                op.worktree.clone(),
                op.source.clone(),
                op.target.clone(),
            )
        };

        let conflicted = conflicted_paths(&worktree).await?;
        for path in &conflicted {
            if !resolutions.iter().any(|(p, _)| p == path) {
                return Err(GitError::UnresolvedConflict { path: path.clone() });
            }
        }

        for (path, content) in resolutions {
            let file = worktree.join(path);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file, content)?;
            git_ok(&worktree, &["add", "--", path]).await?;
        }

        let out = match kind {
            PendingOpKind::Merge => {
                let mut args: Vec<&str> = COMMITTER_ARGS.to_vec();
                args.extend(["commit", "--no-edit"]);
                git(&worktree, &args).await?
            }
            PendingOpKind::Rebase => {
                let mut args: Vec<&str> = COMMITTER_ARGS.to_vec();
                args.extend(["-c", "core.editor=true", "rebase", "--continue"]);
                git(&worktree, &args).await?
            }
        };

        if !out.success() {
            // A rebase can stop again on the next replayed commit.
            let next_conflicts = collect_conflicts(&worktree).await?;
            if kind == PendingOpKind::Rebase && !next_conflicts.is_empty() {
                return Ok(MergeResult {
                    success: false,
                    merge_type: MergeOutcome::Conflict,
                    new_sha: None,
                    conflicts: next_conflicts,
                    op_id: Some(op_id.to_string()),
                    message: format!("rebase of {source} onto {target} has further conflicts"),
                });
            }
            return Err(GitError::CommandFailed {
                args: "resolve_conflicts".to_string(),
                code: out.status_code,
                stderr: out.stderr.trim().to_string(),
            });
        }

        let new_sha = head_sha(&worktree).await?;
        repo.remove_worktree_dir(&worktree).await;
        self.pending_ops.lock().remove(op_id);
        Ok(MergeResult {
            success: true,
            merge_type: MergeOutcome::MergeCommit,
            new_sha: Some(new_sha),
            conflicts: Vec::new(),
            op_id: None,
            message: match kind {
                PendingOpKind::Merge => format!("merged {source} into {target} (resolved)"),
                PendingOpKind::Rebase => format!("rebased {source} onto {target} (resolved)"),
            },
        })
    }

    /// Abandon an in-progress conflicted operation.
    pub async fn abort_pending_op(&self, repo_id: &RepoId, op_id: &str) -> Result<(), GitError> {
        let repo = self.repo(repo_id)?;
        let _guard = repo.write_lock.lock().await;
        let op = self
            .pending_ops
            .lock()
            .remove(op_id)
            .ok_or_else(|| GitError::PendingOpNotFound(op_id.to_string()))?;
        match op.kind {
            PendingOpKind::Merge => {
                let _ = git(&op.worktree, &["merge", "--abort"]).await;
            }
            PendingOpKind::Rebase => {
                let _ = git(&op.worktree, &["rebase", "--abort"]).await;
            }
        }
        repo.remove_worktree_dir(&op.worktree).await;
        Ok(())
    }

    /// Apply a unified diff on top of a branch and commit it.
    ///
    /// Returns the new tip (unchanged when the diff is empty).
    pub async fn apply_patch(
        &self,
        repo_id: &RepoId,
        branch: &str,
        diff_text: &str,
        message: &str,
    ) -> Result<String, GitError> {
        let repo = self.repo(repo_id)?;
        let _guard = repo.write_lock.lock().await;

        let tip = repo.branch_sha(branch).await?;
        if diff_text.trim().is_empty() {
            return Ok(tip);
        }

        let op_id = UuidIdGen.next();
        let worktree = repo.worktrees_dir.join(format!("patch-{op_id}"));
        checkout_branch_worktree(&repo, &worktree, branch).await?;

        let apply = git_rpc(&worktree, &["apply", "--index"], diff_text.as_bytes()).await;
        if let Err(e) = apply {
            repo.remove_worktree_dir(&worktree).await;
            return Err(e);
        }

        let status = git_ok(&worktree, &["status", "--porcelain"]).await?;
        if status.stdout.trim().is_empty() {
            repo.remove_worktree_dir(&worktree).await;
            return Ok(tip);
        }

        let mut args: Vec<&str> = COMMITTER_ARGS.to_vec();
        args.extend(["commit", "-m", message]);
        let commit = git(&worktree, &args).await?;
        if !commit.success() {
            repo.remove_worktree_dir(&worktree).await;
            return Err(GitError::CommandFailed {
                args: "commit".to_string(),
                code: commit.status_code,
                stderr: commit.stderr.trim().to_string(),
            });
        }
        let new_sha = head_sha(&worktree).await?;
        repo.remove_worktree_dir(&worktree).await;
        Ok(new_sha)
    }
}

/// `git worktree add` with the branch checked out, so completing the
/// operation moves the shared branch ref.
async fn checkout_branch_worktree(
    repo: &RepoHandle,
    worktree: &Path,
    branch: &str,
) -> Result<(), GitError> {
    let path_str = worktree.to_string_lossy().into_owned();
    git_ok(&repo.bare_dir, &["worktree", "add", &path_str, branch]).await?;
    Ok(())
}

async fn head_sha(worktree: &Path) -> Result<String, GitError> {
    let out = git_ok(worktree, &["rev-parse", "HEAD"]).await?;
    Ok(out.stdout.trim().to_string())
}

/// `git merge-base --is-ancestor a b`
async fn is_ancestor(repo: &RepoHandle, a: &str, b: &str) -> Result<bool, GitError> {
    let out = git(&repo.bare_dir, &["merge-base", "--is-ancestor", a, b]).await?;
    Ok(out.success())
}

/// Paths currently in a conflicted state in a worktree.
async fn conflicted_paths(worktree: &Path) -> Result<Vec<String>, GitError> {
    let out = git_ok(worktree, &["status", "--porcelain"]).await?;
    let mut paths = Vec::new();
    for line in out.stdout.lines() {
        if line.len() < 4 {
            continue;
        }
        let xy = &line[..2];
        let conflicted = matches!(xy, "UU" | "AA" | "DD" | "AU" | "UA" | "DU" | "UD");
        if conflicted {
            paths.push(line[3..].to_string());
        }
    }
    Ok(paths)
}

/// Structured three-way detail for every conflicted path.
async fn collect_conflicts(worktree: &Path) -> Result<Vec<ConflictDetail>, GitError> {
    let mut conflicts = Vec::new();
    for path in conflicted_paths(worktree).await? {
        let base_content = stage_content(worktree, 1, &path).await;
        let ours_content = stage_content(worktree, 2, &path).await;
        let theirs_content = stage_content(worktree, 3, &path).await;
        conflicts.push(ConflictDetail {
            path,
            base_content,
            ours_content,
            theirs_content,
        });
    }
    Ok(conflicts)
}

/// Content of one side of a conflicted index entry; `None` when the
/// file is absent on that side.
async fn stage_content(worktree: &Path, stage: u8, path: &str) -> Option<String> {
    let spec = format!(":{stage}:{path}");
    let out = git(worktree, &["show", &spec]).await.ok()?;
    if out.success() {
        Some(out.stdout)
    } else {
        None
    }
}

/// Worktree directories still registered as pending operations.
pub(crate) fn pending_worktrees(store: &GitStore, repo_id: &RepoId) -> Vec<PathBuf> {
    store
        .pending_ops
        .lock()
        .values()
        .filter(|op| &op.repo_id == repo_id)
        .map(|op| op.worktree.clone())
        .collect()
}

#[cfg(test)]
#[path = "merge_tests.rs"]
mod tests;
