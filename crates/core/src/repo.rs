// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository records managed by the control plane.

use crate::run::RepoId;
use serde::{Deserialize, Serialize};

/// A repository hosted by the control plane.
///
/// The on-disk bare repository is the source of truth for git state;
/// this record is the source of truth for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    pub name: String,
    pub default_branch: String,
    /// Token embedded in minted clone URLs.
    pub clone_token: String,
    pub created_at_ms: u64,
}
