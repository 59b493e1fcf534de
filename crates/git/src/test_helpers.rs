// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for git substrate tests. All of them drive the real
//! system `git` binary inside tempdirs.

use crate::cmd::{git_ok, COMMITTER_ARGS};
use crate::store::{GitStore, RepoHandle};
use laf_core::{IdGen, RepoId, UuidIdGen};
use std::sync::Arc;
use tempfile::TempDir;

/// A fresh store with one repository (`r1`, default branch `main`)
/// seeded with an empty root commit.
pub(crate) async fn seeded_store() -> (TempDir, GitStore, Arc<RepoHandle>) {
    let dir = tempfile::tempdir().unwrap();
    let store = GitStore::new(dir.path().join("repos"));
    let repo = store.init_repo(&RepoId::new("r1"), "main").await.unwrap();
    (dir, store, repo)
}

/// Commit a file on a branch through an ephemeral worktree; returns the
/// new tip SHA.
pub(crate) async fn commit_file(
    repo: &RepoHandle,
    branch: &str,
    path: &str,
    content: &str,
    message: &str,
) -> String {
    let wt = repo
        .worktrees_dir
        .join(format!("seed-{}", UuidIdGen.next()));
    let wt_str = wt.to_string_lossy().into_owned();
    git_ok(&repo.bare_dir, &["worktree", "add", &wt_str, branch])
        .await
        .unwrap();

    let file = wt.join(path);
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&file, content).unwrap();
    git_ok(&wt, &["add", "-A"]).await.unwrap();

    let mut args: Vec<&str> = COMMITTER_ARGS.to_vec();
    args.extend(["commit", "-m", message]);
    git_ok(&wt, &args).await.unwrap();
    let sha = git_ok(&wt, &["rev-parse", "HEAD"]).await.unwrap();

    git_ok(&repo.bare_dir, &["worktree", "remove", "--force", &wt_str])
        .await
        .unwrap();
    sha.stdout.trim().to_string()
}

/// Read a branch-tip file's content via `git show`.
pub(crate) async fn file_at(repo: &RepoHandle, branch: &str, path: &str) -> Option<String> {
    let spec = format!("refs/heads/{branch}:{path}");
    let out = crate::cmd::git(&repo.bare_dir, &["show", &spec]).await.unwrap();
    if out.success() {
        Some(out.stdout)
    } else {
        None
    }
}
