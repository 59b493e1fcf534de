// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{commit_file, file_at, seeded_store};

#[tokio::test]
async fn fast_forward_merge_moves_target() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "a.txt", "base\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    let feature_tip = commit_file(&repo, "feature", "a.txt", "changed\n", "change").await;

    let result = store
        .merge(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.merge_type, MergeOutcome::FastForward);
    assert_eq!(result.new_sha.as_deref(), Some(feature_tip.as_str()));

    // Post-merge the diff between target and feature is empty
    let diff = repo.diff("main", "feature").await.unwrap();
    assert!(diff.is_empty());
}

#[tokio::test]
async fn diverged_branches_get_a_merge_commit() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "a.txt", "base\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    commit_file(&repo, "feature", "b.txt", "feature side\n", "feature work").await;
    commit_file(&repo, "main", "c.txt", "main side\n", "main work").await;

    let result = store
        .merge(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.merge_type, MergeOutcome::MergeCommit);

    // Both sides' files exist on main
    assert!(file_at(&repo, "main", "b.txt").await.is_some());
    assert!(file_at(&repo, "main", "c.txt").await.is_some());
}

#[tokio::test]
async fn already_merged_branch_is_up_to_date() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "a.txt", "base\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();

    let result = store
        .merge(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.merge_type, MergeOutcome::AlreadyUpToDate);
}

#[tokio::test]
async fn conflicting_merge_returns_three_way_detail() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "x.py", "line 12 original\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    commit_file(&repo, "feature", "x.py", "line 12 feature\n", "feature edit").await;
    commit_file(&repo, "main", "x.py", "line 12 main\n", "main edit").await;

    let result = store
        .merge(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.merge_type, MergeOutcome::Conflict);
    assert!(result.op_id.is_some());
    assert_eq!(result.conflicts.len(), 1);

    let conflict = &result.conflicts[0];
    assert_eq!(conflict.path, "x.py");
    assert_eq!(conflict.base_content.as_deref(), Some("line 12 original\n"));
    assert_eq!(conflict.ours_content.as_deref(), Some("line 12 main\n"));
    assert_eq!(conflict.theirs_content.as_deref(), Some("line 12 feature\n"));
}

#[tokio::test]
async fn resolve_conflicts_completes_the_merge() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "x.py", "original\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    commit_file(&repo, "feature", "x.py", "feature\n", "feature edit").await;
    commit_file(&repo, "main", "x.py", "main\n", "main edit").await;

    let conflicted = store
        .merge(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    let op_id = conflicted.op_id.unwrap();

    let resolved = store
        .resolve_conflicts(
            &RepoId::new("r1"),
            &op_id,
            &[("x.py".to_string(), "custom resolution\n".to_string())],
        )
        .await
        .unwrap();
    assert!(resolved.success);
    assert!(resolved.new_sha.is_some());

    assert_eq!(
        file_at(&repo, "main", "x.py").await.as_deref(),
        Some("custom resolution\n")
    );
    // Merge closed: feature is fully contained in main
    let feature_tip = repo.branch_sha("feature").await.unwrap();
    let main_tip = repo.branch_sha("main").await.unwrap();
    let contained = crate::cmd::git(
        &repo.bare_dir,
        &["merge-base", "--is-ancestor", &feature_tip, &main_tip],
    )
    .await
    .unwrap();
    assert!(contained.success());
}

#[tokio::test]
async fn resolve_with_ours_matches_ours_content() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "x.py", "original\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    commit_file(&repo, "feature", "x.py", "feature\n", "feature edit").await;
    commit_file(&repo, "main", "x.py", "main\n", "main edit").await;

    let conflicted = store
        .merge(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    let ours = conflicted.conflicts[0].ours_content.clone().unwrap();
    let op_id = conflicted.op_id.unwrap();

    store
        .resolve_conflicts(&RepoId::new("r1"), &op_id, &[("x.py".to_string(), ours.clone())])
        .await
        .unwrap();

    // Equivalent to merge with strategy=ours for this file
    assert_eq!(file_at(&repo, "main", "x.py").await, Some(ours));
}

#[tokio::test]
async fn resolve_missing_a_conflicted_path_is_rejected() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "x.py", "original\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    commit_file(&repo, "feature", "x.py", "feature\n", "f").await;
    commit_file(&repo, "main", "x.py", "main\n", "m").await;

    let conflicted = store
        .merge(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    let op_id = conflicted.op_id.unwrap();

    let err = store
        .resolve_conflicts(&RepoId::new("r1"), &op_id, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, GitError::UnresolvedConflict { .. }));

    // The op stays pending and can still be resolved
    store
        .resolve_conflicts(
            &RepoId::new("r1"),
            &op_id,
            &[("x.py".to_string(), "fixed\n".to_string())],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn resolve_unknown_op_is_an_error() {
    let (_dir, store, _repo) = seeded_store().await;
    assert!(matches!(
        store
            .resolve_conflicts(&RepoId::new("r1"), "ghost", &[])
            .await,
        Err(GitError::PendingOpNotFound(_))
    ));
}

#[tokio::test]
async fn abort_pending_op_cleans_up() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "x.py", "original\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    commit_file(&repo, "feature", "x.py", "feature\n", "f").await;
    let main_tip = commit_file(&repo, "main", "x.py", "main\n", "m").await;

    let conflicted = store
        .merge(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    let op_id = conflicted.op_id.unwrap();

    store.abort_pending_op(&RepoId::new("r1"), &op_id).await.unwrap();
    // Target branch unchanged
    assert_eq!(repo.branch_sha("main").await.unwrap(), main_tip);
}

#[tokio::test]
async fn rebase_replays_feature_commits() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "a.txt", "base\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    commit_file(&repo, "feature", "b.txt", "feature\n", "feature work").await;
    let main_tip = commit_file(&repo, "main", "c.txt", "main\n", "main work").await;

    let result = store
        .rebase(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    assert!(result.success);
    assert!(!result.fast_forward);

    // Feature now contains main's work underneath its own
    assert!(file_at(&repo, "feature", "c.txt").await.is_some());
    assert!(file_at(&repo, "feature", "b.txt").await.is_some());
    let commits = repo.commits("feature", 10).await.unwrap();
    assert!(commits.iter().any(|c| c.sha == main_tip));
}

#[tokio::test]
async fn rebase_behind_branch_fast_forwards() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "a.txt", "base\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    let main_tip = commit_file(&repo, "main", "b.txt", "more\n", "more").await;

    let result = store
        .rebase(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.fast_forward);
    assert_eq!(result.new_sha.as_deref(), Some(main_tip.as_str()));
    assert_eq!(repo.branch_sha("feature").await.unwrap(), main_tip);
}

#[tokio::test]
async fn rebase_conflict_resolves_like_merge() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "x.py", "original\n", "base").await;
    repo.ensure_branch("feature", "main").await.unwrap();
    commit_file(&repo, "feature", "x.py", "feature\n", "feature edit").await;
    commit_file(&repo, "main", "x.py", "main\n", "main edit").await;

    let conflicted = store
        .rebase(&RepoId::new("r1"), "feature", "main")
        .await
        .unwrap();
    assert!(!conflicted.success);
    assert_eq!(conflicted.conflicts.len(), 1);
    let op_id = conflicted.op_id.unwrap();

    let resolved = store
        .resolve_conflicts(
            &RepoId::new("r1"),
            &op_id,
            &[("x.py".to_string(), "rebased resolution\n".to_string())],
        )
        .await
        .unwrap();
    assert!(resolved.success);
    assert_eq!(
        file_at(&repo, "feature", "x.py").await.as_deref(),
        Some("rebased resolution\n")
    );
}

#[tokio::test]
async fn apply_patch_commits_diff_on_branch() {
    let (_dir, store, repo) = seeded_store().await;
    commit_file(&repo, "main", "a.txt", "one\n", "base").await;

    let patch = "diff --git a/a.txt b/a.txt\n\
                 --- a/a.txt\n\
                 +++ b/a.txt\n\
                 @@ -1 +1,2 @@\n one\n+two\n";
    let new_sha = store
        .apply_patch(&RepoId::new("r1"), "main", patch, "agent changes")
        .await
        .unwrap();

    assert_eq!(repo.branch_sha("main").await.unwrap(), new_sha);
    assert_eq!(
        file_at(&repo, "main", "a.txt").await.as_deref(),
        Some("one\ntwo\n")
    );
}

#[tokio::test]
async fn apply_empty_patch_is_a_noop() {
    let (_dir, store, repo) = seeded_store().await;
    let tip = commit_file(&repo, "main", "a.txt", "one\n", "base").await;
    let sha = store
        .apply_patch(&RepoId::new("r1"), "main", "  \n", "noop")
        .await
        .unwrap();
    assert_eq!(sha, tip);
}
