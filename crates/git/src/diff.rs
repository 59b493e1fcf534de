// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Diff computation and unified-patch parsing.

use crate::cmd::{git_ok, GitError};
use crate::store::RepoHandle;
use crate::types::{DiffSummary, FileDiff, FileStatus};
use std::collections::HashMap;

impl RepoHandle {
    /// Unified textual diff between two refs, parsed into per-file
    /// patches with add/del counts. Read-only: no repo lock.
    pub async fn diff(&self, base: &str, head: &str) -> Result<DiffSummary, GitError> {
        let range = format!("{base}..{head}");
        let numstat = git_ok(&self.bare_dir, &["diff", "--numstat", &range]).await?;
        let patch = git_ok(&self.bare_dir, &["diff", &range]).await?;
        Ok(parse_diff(&numstat.stdout, &patch.stdout))
    }
}

/// Combine `--numstat` counts with the unified patch text.
pub fn parse_diff(numstat: &str, patch: &str) -> DiffSummary {
    let patches = split_patches(patch);
    let mut summary = DiffSummary::default();

    for line in numstat.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(adds), Some(dels), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        // Binary files report "-" counts
        let binary = adds == "-" || dels == "-";
        let additions: u32 = adds.parse().unwrap_or(0);
        let deletions: u32 = dels.parse().unwrap_or(0);

        // Renames appear as "old => new" (possibly brace-compressed)
        let path = normalize_rename(path);
        let file_patch = patches.get(path.as_str()).cloned().unwrap_or_default();

        let status = if binary {
            FileStatus::Binary
        } else {
            file_status(&file_patch, line.contains(" => "))
        };

        summary.additions += additions;
        summary.deletions += deletions;
        summary.files.push(FileDiff {
            path,
            status,
            additions,
            deletions,
            patch: file_patch,
        });
    }
    summary
}

/// Split a unified diff into per-file patch texts keyed by new path.
fn split_patches(patch: &str) -> HashMap<String, String> {
    let mut patches = HashMap::new();
    let mut current_path: Option<String> = None;
    let mut current = String::new();

    for line in patch.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(path) = current_path.take() {
                patches.insert(path, std::mem::take(&mut current));
            }
            current_path = parse_git_header_path(rest);
        }
        if current_path.is_some() {
            current.push_str(line);
            current.push('\n');
        }
    }
    if let Some(path) = current_path {
        patches.insert(path, current);
    }
    patches
}

/// `a/old b/new` → `new`.
fn parse_git_header_path(rest: &str) -> Option<String> {
    let b_side = rest.rsplit(" b/").next()?;
    Some(b_side.trim_matches('"').to_string())
}

/// `dir/{old => new}/file` or `old => new` → new path.
fn normalize_rename(path: &str) -> String {
    if let (Some(open), Some(close)) = (path.find('{'), path.find('}')) {
        let inside = &path[open + 1..close];
        let new_part = inside.split(" => ").nth(1).unwrap_or(inside);
        let mut result = String::new();
        result.push_str(&path[..open]);
        result.push_str(new_part);
        result.push_str(&path[close + 1..]);
        return result.replace("//", "/");
    }
    match path.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => path.to_string(),
    }
}

fn file_status(file_patch: &str, renamed: bool) -> FileStatus {
    if renamed || file_patch.contains("\nrename from ") {
        FileStatus::Renamed
    } else if file_patch.contains("\nnew file mode ") {
        FileStatus::Added
    } else if file_patch.contains("\ndeleted file mode ") {
        FileStatus::Deleted
    } else {
        FileStatus::Modified
    }
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod tests;
