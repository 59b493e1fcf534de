// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git subprocess invocation.

use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Identity used for commits the control plane creates (merge commits,
/// applied patches, resolutions).
pub(crate) const COMMITTER_ARGS: [&str; 4] = [
    "-c",
    "user.name=LazyAF",
    "-c",
    "user.email=lazyaf@localhost",
];

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {args} failed ({code}): {stderr}")]
    CommandFailed {
        args: String,
        code: i32,
        stderr: String,
    },

    #[error("unknown repo: {0}")]
    RepoNotFound(String),

    #[error("unknown branch: {0}")]
    BranchNotFound(String),

    #[error("no pending merge/rebase with id: {0}")]
    PendingOpNotFound(String),

    #[error("conflict for {path} not resolved")]
    UnresolvedConflict { path: String },

    #[error("refusing to {action}: {reason}")]
    Refused { action: String, reason: String },
}

/// Captured output of a finished git command.
#[derive(Debug)]
pub(crate) struct GitOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Run git in `dir`, capturing output. Non-zero exit is returned as a
/// normal [`GitOutput`]; spawn failures are errors.
pub(crate) async fn git(dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
    let start = std::time::Instant::now();
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;

    let result = GitOutput {
        status_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    tracing::debug!(
        args = %args.join(" "),
        dir = %dir.display(),
        code = result.status_code,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "git"
    );

    Ok(result)
}

/// Run git and require success.
pub(crate) async fn git_ok(dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
    let output = git(dir, args).await?;
    if !output.success() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            code: output.status_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Run git with bytes piped to stdin, capturing raw stdout. Used by the
/// smart-HTTP stateless-rpc endpoints where payloads are binary pack
/// data.
pub(crate) async fn git_rpc(dir: &Path, args: &[&str], input: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}
