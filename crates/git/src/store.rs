// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository store: one bare repository per repo id plus a worktree
//! area, all under a single storage root.

use crate::cmd::{git_ok, GitError, COMMITTER_ARGS};
use crate::types::PendingOpKind;
use laf_core::RepoId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An in-progress conflicted merge/rebase awaiting resolution.
pub(crate) struct PendingOp {
    pub kind: PendingOpKind,
    pub repo_id: RepoId,
    pub worktree: PathBuf,
    pub source: String,
    pub target: String,
}

/// A single repository on disk.
///
/// The write lock serializes mutating operations (merges, rebases,
/// ref updates, cleanup); read-only operations see a transient
/// snapshot without acquiring it.
pub struct RepoHandle {
    pub id: RepoId,
    pub default_branch: String,
    pub bare_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub(crate) write_lock: tokio::sync::Mutex<()>,
}

impl RepoHandle {
    /// Tip SHA of a branch.
    pub async fn branch_sha(&self, branch: &str) -> Result<String, GitError> {
        let out = crate::cmd::git(
            &self.bare_dir,
            &["rev-parse", "--verify", &format!("refs/heads/{branch}")],
        )
        .await?;
        if !out.success() {
            return Err(GitError::BranchNotFound(branch.to_string()));
        }
        Ok(out.stdout.trim().to_string())
    }

    /// Whether a branch ref exists.
    pub async fn branch_exists(&self, branch: &str) -> bool {
        self.branch_sha(branch).await.is_ok()
    }

    /// Create `branch` at the tip of `from` (no-op when it exists).
    pub async fn ensure_branch(&self, branch: &str, from: &str) -> Result<String, GitError> {
        if let Ok(sha) = self.branch_sha(branch).await {
            return Ok(sha);
        }
        let _guard = self.write_lock.lock().await;
        let from_sha = self.branch_sha(from).await?;
        git_ok(
            &self.bare_dir,
            &["update-ref", &format!("refs/heads/{branch}"), &from_sha],
        )
        .await?;
        Ok(from_sha)
    }
}

/// Process-singleton store of repositories.
pub struct GitStore {
    root: PathBuf,
    repos: Mutex<HashMap<RepoId, Arc<RepoHandle>>>,
    pub(crate) pending_ops: Mutex<HashMap<String, PendingOp>>,
}

impl GitStore {
    /// `root` is the configured `repo_storage_root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            repos: Mutex::new(HashMap::new()),
            pending_ops: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bare_dir(&self, id: &RepoId) -> PathBuf {
        self.root.join(id.as_str()).join("bare.git")
    }

    fn worktrees_dir(&self, id: &RepoId) -> PathBuf {
        self.root.join(id.as_str()).join("worktrees")
    }

    /// Initialize a bare repository with an empty root commit on the
    /// default branch, and register a handle for it.
    pub async fn init_repo(
        &self,
        id: &RepoId,
        default_branch: &str,
    ) -> Result<Arc<RepoHandle>, GitError> {
        let bare = self.bare_dir(id);
        std::fs::create_dir_all(&bare)?;
        git_ok(&bare, &["init", "--bare", "-b", default_branch, "."]).await?;

        // Seed an empty root commit so the default branch exists.
        let tree = git_ok(&bare, &["hash-object", "-w", "-t", "tree", "/dev/null"]).await?;
        let tree_sha = tree.stdout.trim().to_string();
        let mut args: Vec<&str> = COMMITTER_ARGS.to_vec();
        args.extend(["commit-tree", &tree_sha, "-m", "initial"]);
        let commit = git_ok(&bare, &args).await?;
        let commit_sha = commit.stdout.trim().to_string();
        git_ok(
            &bare,
            &[
                "update-ref",
                &format!("refs/heads/{default_branch}"),
                &commit_sha,
            ],
        )
        .await?;

        std::fs::create_dir_all(self.worktrees_dir(id))?;
        Ok(self.register(id, default_branch))
    }

    /// Register a handle for an existing on-disk repository.
    pub fn open_repo(&self, id: &RepoId, default_branch: &str) -> Result<Arc<RepoHandle>, GitError> {
        if !self.bare_dir(id).join("HEAD").exists() {
            return Err(GitError::RepoNotFound(id.to_string()));
        }
        Ok(self.register(id, default_branch))
    }

    fn register(&self, id: &RepoId, default_branch: &str) -> Arc<RepoHandle> {
        let handle = Arc::new(RepoHandle {
            id: id.clone(),
            default_branch: default_branch.to_string(),
            bare_dir: self.bare_dir(id),
            worktrees_dir: self.worktrees_dir(id),
            write_lock: tokio::sync::Mutex::new(()),
        });
        self.repos.lock().insert(id.clone(), Arc::clone(&handle));
        handle
    }

    /// Look up a previously initialized or opened repository.
    pub fn repo(&self, id: &RepoId) -> Result<Arc<RepoHandle>, GitError> {
        self.repos
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| GitError::RepoNotFound(id.to_string()))
    }

    /// Drop a repository's handle and delete its on-disk state.
    pub async fn delete_repo(&self, id: &RepoId) -> Result<(), GitError> {
        let handle = self.repo(id)?;
        let _guard = handle.write_lock.lock().await;
        self.repos.lock().remove(id);
        let dir = self.root.join(id.as_str());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Mint the internal push/pull endpoint for a repository.
    pub fn clone_url(&self, http_base: &str, id: &RepoId, clone_token: &str) -> String {
        format!("{http_base}/git/{id}/{clone_token}")
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
