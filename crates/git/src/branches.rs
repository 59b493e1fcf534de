// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Branch enumeration, commit listing, and object verification.

use crate::cmd::{git, GitError};
use crate::store::RepoHandle;
use crate::types::{BranchInfo, Commit};

/// Field separator in `git log` format strings.
const SEP: char = '\u{1f}';

impl RepoHandle {
    /// Enumerate branch refs. With `verify`, walk each branch's
    /// reachable objects and flag branches whose pack is missing
    /// objects as damaged, enumerating the missing SHAs.
    pub async fn branches(&self, verify: bool) -> Result<Vec<BranchInfo>, GitError> {
        let out = git(
            &self.bare_dir,
            &[
                "for-each-ref",
                "refs/heads",
                "--format=%(refname:short)\t%(objectname)",
            ],
        )
        .await?;
        if !out.success() {
            return Err(GitError::CommandFailed {
                args: "for-each-ref refs/heads".to_string(),
                code: out.status_code,
                stderr: out.stderr.trim().to_string(),
            });
        }

        let mut branches = Vec::new();
        for line in out.stdout.lines() {
            let Some((name, sha)) = line.split_once('\t') else {
                continue;
            };
            let mut info = BranchInfo {
                name: name.to_string(),
                commit_sha: sha.to_string(),
                damaged: false,
                missing_objects: Vec::new(),
            };
            if verify {
                let missing = self.verify_branch(name).await?;
                if !missing.is_empty() {
                    info.damaged = true;
                    info.missing_objects = missing;
                }
            }
            branches.push(info);
        }
        Ok(branches)
    }

    /// Walk a branch's reachable objects, returning the SHAs git
    /// reported missing (empty when the branch is intact).
    ///
    /// Two passes: `rev-list --objects` catches missing commits and
    /// trees; feeding the listed objects through
    /// `cat-file --batch-check` catches missing blobs, which rev-list
    /// enumerates without opening.
    pub async fn verify_branch(&self, branch: &str) -> Result<Vec<String>, GitError> {
        let out = git(
            &self.bare_dir,
            &["rev-list", "--objects", &format!("refs/heads/{branch}")],
        )
        .await?;
        if !out.success() {
            return Ok(missing_shas(&out.stderr));
        }

        let sha_list: String = out
            .stdout
            .lines()
            .filter_map(|l| l.get(..40))
            .map(|sha| format!("{sha}\n"))
            .collect();
        let check = crate::cmd::git_rpc(
            &self.bare_dir,
            &["cat-file", "--batch-check"],
            sha_list.as_bytes(),
        )
        .await?;

        let mut missing = Vec::new();
        for line in String::from_utf8_lossy(&check).lines() {
            if let Some(sha) = line.strip_suffix(" missing") {
                if sha.len() == 40 && !missing.iter().any(|m| m == sha) {
                    missing.push(sha.to_string());
                }
            }
        }
        Ok(missing)
    }

    /// Recent commits on a branch, newest first.
    pub async fn commits(&self, branch: &str, limit: u32) -> Result<Vec<Commit>, GitError> {
        // Verify the ref first so an unknown branch is a clean error.
        self.branch_sha(branch).await?;
        let count = limit.to_string();
        let format = format!("--format=%H{SEP}%an{SEP}%ae{SEP}%at{SEP}%s");
        let out = git(
            &self.bare_dir,
            &[
                "log",
                &format!("refs/heads/{branch}"),
                "--max-count",
                &count,
                &format,
            ],
        )
        .await?;
        if !out.success() {
            return Err(GitError::CommandFailed {
                args: format!("log {branch}"),
                code: out.status_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(parse_commits(&out.stdout))
    }
}

/// Extract object SHAs from rev-list/fsck error text.
fn missing_shas(stderr: &str) -> Vec<String> {
    let mut shas: Vec<String> = Vec::new();
    for token in stderr.split(|c: char| !c.is_ascii_hexdigit()) {
        if token.len() == 40 && !shas.iter().any(|s| s == token) {
            shas.push(token.to_string());
        }
    }
    shas
}

fn parse_commits(stdout: &str) -> Vec<Commit> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(5, SEP);
            let sha = parts.next()?;
            let author = parts.next()?;
            let email = parts.next()?;
            let timestamp_s: u64 = parts.next()?.parse().ok()?;
            let message = parts.next().unwrap_or_default();
            Some(Commit {
                sha: sha.to_string(),
                author: author.to_string(),
                email: email.to_string(),
                timestamp_ms: timestamp_s * 1000,
                message: message.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "branches_tests.rs"]
mod tests;
