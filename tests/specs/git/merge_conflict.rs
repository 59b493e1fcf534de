//! Scenario: both branches edit the same line; the merge surfaces a
//! structured three-way conflict, the user supplies replacement
//! content, and the substrate completes the merge.

use crate::prelude::*;
use laf_core::RepoId;
use laf_git::MergeOutcome;

/// Commit a file on a branch via the repo's worktree machinery.
async fn put_file(stack: &Stack, branch: &str, path: &str, content: &str) {
    let repo = stack.git.repo(&RepoId::new("r1")).unwrap();
    repo.ensure_branch(branch, "main").await.unwrap();
    let run = laf_core::RunId::new(format!("seed-{branch}-{path}"));
    let lease = repo.lease_worktree(branch, &run, 0).await.unwrap();

    let file = lease.path.join(path);
    std::fs::write(&file, content).unwrap();
    // Commit from the detached worktree, then move the branch ref.
    let sha = {
        use std::process::Command;
        let run_git = |args: &[&str]| {
            let out = Command::new("git")
                .args(args)
                .current_dir(&lease.path)
                .env("GIT_AUTHOR_NAME", "spec")
                .env("GIT_AUTHOR_EMAIL", "spec@localhost")
                .env("GIT_COMMITTER_NAME", "spec")
                .env("GIT_COMMITTER_EMAIL", "spec@localhost")
                .output()
                .unwrap();
            assert!(
                out.status.success(),
                "git {args:?}: {}",
                String::from_utf8_lossy(&out.stderr)
            );
            String::from_utf8_lossy(&out.stdout).trim().to_string()
        };
        run_git(&["add", "-A"]);
        run_git(&["commit", "-m", "edit"]);
        run_git(&["rev-parse", "HEAD"])
    };
    {
        use std::process::Command;
        let out = Command::new("git")
            .args(["update-ref", &format!("refs/heads/{branch}"), &sha])
            .current_dir(&repo.bare_dir)
            .output()
            .unwrap();
        assert!(out.status.success());
    }
    repo.release_worktree(lease, false).await;
}

#[tokio::test]
async fn conflicting_edits_resolve_with_custom_content() {
    let stack = stack().await;
    let repo_id = RepoId::new("r1");

    put_file(&stack, "main", "x.py", "line 12 original\n").await;
    put_file(&stack, "feature", "x.py", "line 12 feature\n").await;
    put_file(&stack, "main", "x.py", "line 12 main\n").await;

    let result = stack.git.merge(&repo_id, "feature", "main").await.unwrap();
    assert!(!result.success);
    assert_eq!(result.merge_type, MergeOutcome::Conflict);

    let conflict = &result.conflicts[0];
    assert_eq!(conflict.path, "x.py");
    assert_eq!(conflict.base_content.as_deref(), Some("line 12 original\n"));
    assert_eq!(conflict.ours_content.as_deref(), Some("line 12 main\n"));
    assert_eq!(conflict.theirs_content.as_deref(), Some("line 12 feature\n"));

    let resolved = stack
        .git
        .resolve_conflicts(
            &repo_id,
            &result.op_id.unwrap(),
            &[("x.py".to_string(), "line 12 custom\n".to_string())],
        )
        .await
        .unwrap();
    assert!(resolved.success);

    // The feature branch is now fully contained in main.
    let repo = stack.git.repo(&repo_id).unwrap();
    let feature_tip = repo.branch_sha("feature").await.unwrap();
    let main_tip = repo.branch_sha("main").await.unwrap();
    let out = std::process::Command::new("git")
        .args(["merge-base", "--is-ancestor", &feature_tip, &main_tip])
        .current_dir(&repo.bare_dir)
        .output()
        .unwrap();
    assert!(out.status.success());
}
