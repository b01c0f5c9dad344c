// Copyright 2024 The git-sift Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use assert_matches::assert_matches;
use sift_lib::driver::{run, DriverError, RewriteParams};
use sift_lib::object_id::ObjectId as _;
use sift_lib::rewrite::RewriteError;
use testutils::TestRepo;

fn params(repo: &TestRepo, branch: &str) -> RewriteParams {
    RewriteParams {
        repo_path: Some(repo.path_buf()),
        branch: branch.to_string(),
        ..Default::default()
    }
}

fn linear_repo() -> (TestRepo, Vec<git2::Oid>) {
    let repo = TestRepo::init();
    let mut commits = vec![];
    let mut parent: Option<git2::Oid> = None;
    for i in 0..5 {
        let contents = format!("contents {i}");
        let parents: Vec<_> = parent.into_iter().collect();
        let oid = repo.commit(
            &parents,
            &[("file.txt", contents.as_bytes())],
            &format!("commit {i}\n"),
        );
        commits.push(oid);
        parent = Some(oid);
    }
    (repo, commits)
}

#[test]
fn test_missing_filter() {
    let (repo, _commits) = linear_repo();
    let err = run(&params(&repo, "filtered")).unwrap_err();
    assert_matches!(err, DriverError::MissingFilter);
    assert!(repo.branch_tip("filtered").is_none());
}

#[test]
fn test_missing_branch_name() {
    let (repo, _commits) = linear_repo();
    let mut params = params(&repo, "");
    params.commit_filter = Some("commit.message += \"X\"".to_string());
    let err = run(&params).unwrap_err();
    assert_matches!(err, DriverError::MissingBranchName);
}

#[test]
fn test_invalid_repository() {
    let temp_dir = testutils::new_temp_dir();
    let params = RewriteParams {
        repo_path: Some(temp_dir.path().to_path_buf()),
        branch: "filtered".to_string(),
        commit_filter: Some("commit.message += \"X\"".to_string()),
        ..Default::default()
    };
    let err = run(&params).unwrap_err();
    assert_matches!(err, DriverError::InvalidRepository { .. });
}

#[test]
fn test_branch_exists_requires_force() {
    let (repo, _commits) = linear_repo();
    let mut params = params(&repo, "filtered");
    params.commit_filter = Some("commit.message += \"X\"".to_string());
    run(&params).unwrap();
    let err = run(&params).unwrap_err();
    assert_matches!(err, DriverError::BranchExistsNoForce { .. });
    params.force = true;
    run(&params).unwrap();
}

#[test]
fn test_invalid_revspec() {
    let (repo, _commits) = linear_repo();
    let mut params = params(&repo, "filtered");
    params.commit_filter = Some("commit.message += \"X\"".to_string());
    params.revspec = Some("master...master".to_string());
    let err = run(&params).unwrap_err();
    assert_matches!(err, DriverError::InvalidRevspec { .. });

    params.revspec = Some("no-such-rev".to_string());
    let err = run(&params).unwrap_err();
    assert_matches!(err, DriverError::InvalidRevspec { .. });
}

#[test]
fn test_commit_message_append_over_range() {
    let (repo, commits) = linear_repo();
    let mut params = params(&repo, "filtered");
    params.commit_filter = Some("commit.message += \"X\"".to_string());
    params.revspec = Some("HEAD~4..HEAD".to_string());
    run(&params).unwrap();

    let log = repo.first_parent_log("filtered");
    assert_eq!(log.len(), 5);
    // The last four commits of the range were rewritten.
    for (i, oid) in log[..4].iter().enumerate() {
        let message = repo.message_of(*oid);
        assert!(
            message.ends_with('X'),
            "commit {i} message {message:?} does not end with X"
        );
    }
    // The commit below the range keeps its original id.
    assert_eq!(log[4], commits[0]);
}

#[test]
fn test_detach_cuts_boundary_parents() {
    let (repo, _commits) = linear_repo();
    let mut params = params(&repo, "filtered");
    params.commit_filter = Some("commit.message += \"X\"".to_string());
    params.revspec = Some("HEAD~2..HEAD".to_string());
    params.detach = true;
    run(&params).unwrap();

    let log = repo.first_parent_log("filtered");
    assert_eq!(log.len(), 2);
    let oldest = repo.repo.find_commit(log[1]).unwrap();
    assert_eq!(oldest.parent_count(), 0);
}

#[test]
fn test_prune_by_tree_equality() {
    let repo = TestRepo::init();
    let c1 = repo.commit(&[], &[("a.txt", b"a")], "add a\n");
    let c2 = repo.commit(&[c1], &[("a.txt", b"a"), ("junk.txt", b"j")], "add junk\n");
    let c3 = repo.commit(
        &[c2],
        &[("a.txt", b"a"), ("junk.txt", b"j"), ("b.txt", b"b")],
        "add b\n",
    );
    let mut params = params(&repo, "filtered");
    params.remove_rules = "junk.txt\n".to_string();
    run(&params).unwrap();

    // The junk-only commit prunes away; its child re-maps to the image
    // of the first commit.
    let log = repo.first_parent_log("filtered");
    assert_eq!(log.len(), 2);
    assert_eq!(repo.tree_paths(log[0]), vec!["a.txt", "b.txt"]);
    assert_eq!(repo.tree_paths(log[1]), vec!["a.txt"]);
    assert_eq!(repo.message_of(log[0]), "add b\n");
    assert_eq!(repo.message_of(log[1]), "add a\n");
    assert_ne!(log[0], c3);
}

#[test]
fn test_emptied_commit_is_dropped() {
    let repo = TestRepo::init();
    let c1 = repo.commit(&[], &[("junk.txt", b"j")], "only junk\n");
    let _c2 = repo.commit(&[c1], &[("junk.txt", b"j"), ("a.txt", b"a")], "add a\n");
    let mut params = params(&repo, "filtered");
    params.remove_rules = "junk.txt\n".to_string();
    run(&params).unwrap();

    let log = repo.first_parent_log("filtered");
    assert_eq!(log.len(), 1);
    assert_eq!(repo.tree_paths(log[0]), vec!["a.txt"]);
    // The emptied first commit left no parent to link to.
    let tip = repo.repo.find_commit(log[0]).unwrap();
    assert_eq!(tip.parent_count(), 0);
}

#[test]
fn test_everything_discarded_returns_none() {
    let repo = TestRepo::init();
    repo.commit(&[], &[("a.txt", b"a")], "add a\n");
    let mut params = params(&repo, "filtered");
    params.commit_filter = Some("commit.discard = true".to_string());
    let head = run(&params).unwrap();
    assert!(head.is_none());
    assert!(repo.branch_tip("filtered").is_none());
}

fn merge_repo() -> (TestRepo, git2::Oid) {
    let repo = TestRepo::init();
    let base = repo.commit(&[], &[("shared.txt", b"s")], "base\n");
    let junk_side = repo.commit(
        &[base],
        &[("shared.txt", b"s"), ("junk.txt", b"j")],
        "junk side\n",
    );
    let keep_side = repo.commit(
        &[base],
        &[("shared.txt", b"s"), ("keep2.txt", b"k")],
        "keep side\n",
    );
    repo.commit(
        &[junk_side, keep_side],
        &[("shared.txt", b"s"), ("junk.txt", b"j"), ("keep2.txt", b"k")],
        "merge\n",
    );
    (repo, base)
}

#[test]
fn test_merge_prunes_to_matching_parent() {
    let (repo, _base) = merge_repo();
    let mut params = params(&repo, "filtered");
    params.remove_rules = "junk.txt\n".to_string();
    run(&params).unwrap();

    // The merge's rebuilt tree equals the keep-side parent's tree, so the
    // merge itself prunes away and the branch lands on that parent.
    let tip = repo.branch_tip("filtered").unwrap();
    assert_eq!(repo.message_of(tip), "keep side\n");
    assert_eq!(repo.tree_paths(tip), vec!["keep2.txt", "shared.txt"]);
}

#[test]
fn test_preserve_merge_commits_skips_prune() {
    let (repo, base) = merge_repo();
    let mut params = params(&repo, "filtered");
    params.remove_rules = "junk.txt\n".to_string();
    params.preserve_merge_commits = true;
    run(&params).unwrap();

    let tip = repo.branch_tip("filtered").unwrap();
    let tip_commit = repo.repo.find_commit(tip).unwrap();
    assert_eq!(tip_commit.message().unwrap(), "merge\n");
    assert_eq!(tip_commit.parent_count(), 2);
    // The junk side pruned down to the base commit; the keep side was
    // rewritten in place (same content, so the same id as the source).
    assert_eq!(tip_commit.parent_id(0).unwrap(), base);
    assert_eq!(
        repo.message_of(tip_commit.parent_id(1).unwrap()),
        "keep side\n"
    );
    assert_eq!(repo.tree_paths(tip), vec!["keep2.txt", "shared.txt"]);
}

#[test]
fn test_parent_integrity() {
    let (repo, _base) = merge_repo();
    let mut params = params(&repo, "filtered");
    params.remove_rules = "junk.txt\n".to_string();
    params.preserve_merge_commits = true;
    run(&params).unwrap();

    // Every parent of every commit reachable from the new branch exists
    // in the object database.
    let mut stack = vec![repo.branch_tip("filtered").unwrap()];
    while let Some(oid) = stack.pop() {
        let commit = repo.repo.find_commit(oid).unwrap();
        for parent in commit.parent_ids() {
            assert!(repo.repo.find_commit(parent).is_ok());
            stack.push(parent);
        }
    }
}

#[test]
fn test_idempotence() {
    let (repo, _commits) = linear_repo();
    let mut first = params(&repo, "first");
    first.commit_filter = Some("commit.message += \"!\"".to_string());
    first.keep_rules = "*\n".to_string();
    let first_head = run(&first).unwrap();

    let mut second = params(&repo, "second");
    second.commit_filter = first.commit_filter.clone();
    second.keep_rules = first.keep_rules.clone();
    let second_head = run(&second).unwrap();

    // No wall-clock input anywhere, so the two runs materialise
    // byte-identical commits.
    assert_eq!(first_head, second_head);
}

#[test]
fn test_predicate_runtime_error_carries_commit_id() {
    let (repo, commits) = linear_repo();
    let mut params = params(&repo, "filtered");
    params.commit_filter = Some("commit.message += 1".to_string());
    let err = run(&params).unwrap_err();
    match err {
        DriverError::Rewrite(RewriteError::PredicateRuntime {
            source_commit_id,
            message,
        }) => {
            assert_eq!(source_commit_id.as_bytes(), commits[0].as_bytes());
            assert!(message.contains("Cannot add"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(repo.branch_tip("filtered").is_none());
}

#[test]
fn test_predicate_compile_error() {
    let (repo, _commits) = linear_repo();
    let mut params = params(&repo, "filtered");
    params.commit_filter = Some("commit.message += ".to_string());
    let err = run(&params).unwrap_err();
    assert_matches!(err, DriverError::PredicateCompilation(_));
}
