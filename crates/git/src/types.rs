// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured results returned by the git substrate.

use serde::{Deserialize, Serialize};

/// A branch ref, optionally verified against its reachable objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub commit_sha: String,
    /// Set when verification found the branch's pack missing objects.
    #[serde(default)]
    pub damaged: bool,
    /// Missing object SHAs observed during verification, so the
    /// operator can push to repair.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_objects: Vec<String>,
}

/// A commit on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub author: String,
    pub email: String,
    /// Author timestamp in epoch ms.
    pub timestamp_ms: u64,
    pub message: String,
}

/// Per-file change status in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Binary,
}

/// One file's contribution to a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    /// Unified patch text for this file (empty for binary files).
    pub patch: String,
}

/// A parsed diff between two refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiffSummary {
    pub files: Vec<FileDiff>,
    pub additions: u32,
    pub deletions: u32,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// One file's unresolved three-way merge state. Any side may be absent
/// when the file does not exist on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ours_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theirs_content: Option<String>,
}

/// How a merge landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    FastForward,
    MergeCommit,
    AlreadyUpToDate,
    Conflict,
}

/// Result of `merge(feature → target)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    pub merge_type: MergeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictDetail>,
    /// Pending-operation id to resolve conflicts against, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    pub message: String,
}

/// Result of `rebase(feature onto target)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseResult {
    pub success: bool,
    /// True when the branch was already up to date or fast-forwarded.
    pub fast_forward: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    pub message: String,
}

/// Kind of an in-progress conflicted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOpKind {
    Merge,
    Rebase,
}

/// Outcome of `sync_from_disk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncReport {
    pub branches: Vec<BranchInfo>,
    /// Branch refs pruned because their tips were unreachable.
    pub pruned: Vec<String>,
}
