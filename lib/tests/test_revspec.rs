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

use sift_lib::object_id::ObjectId as _;
use sift_lib::revspec::{self, RevisionRange};
use sift_lib::store::{CommitId, Store};
use testutils::TestRepo;

fn commit_id(oid: git2::Oid) -> CommitId {
    CommitId::from_bytes(oid.as_bytes())
}

fn linear_repo() -> (TestRepo, Vec<git2::Oid>) {
    let repo = TestRepo::init();
    let c0 = repo.commit(&[], &[("file", b"0")], "commit 0\n");
    let c1 = repo.commit(&[c0], &[("file", b"1")], "commit 1\n");
    let c2 = repo.commit(&[c1], &[("file", b"2")], "commit 2\n");
    let c3 = repo.commit(&[c2], &[("file", b"3")], "commit 3\n");
    (repo, vec![c0, c1, c2, c3])
}

#[test]
fn test_parse_defaults_to_head() {
    let (repo, commits) = linear_repo();
    let store = Store::open(repo.path()).unwrap();
    assert_eq!(
        revspec::parse(&store, None).unwrap(),
        RevisionRange::Single(commit_id(commits[3]))
    );
    assert_eq!(
        revspec::parse(&store, Some("")).unwrap(),
        RevisionRange::Single(commit_id(commits[3]))
    );
}

#[test]
fn test_parse_single() {
    let (repo, commits) = linear_repo();
    let store = Store::open(repo.path()).unwrap();
    assert_eq!(
        revspec::parse(&store, Some("master")).unwrap(),
        RevisionRange::Single(commit_id(commits[3]))
    );
    assert_eq!(
        revspec::parse(&store, Some("HEAD~2")).unwrap(),
        RevisionRange::Single(commit_id(commits[1]))
    );
}

#[test]
fn test_parse_range() {
    let (repo, commits) = linear_repo();
    let store = Store::open(repo.path()).unwrap();
    assert_eq!(
        revspec::parse(&store, Some("HEAD~2..HEAD")).unwrap(),
        RevisionRange::Range {
            from: commit_id(commits[1]),
            to: commit_id(commits[3]),
        }
    );
}

#[test]
fn test_parse_rejects_merge_base_form() {
    let (repo, _commits) = linear_repo();
    let store = Store::open(repo.path()).unwrap();
    let err = revspec::parse(&store, Some("master...master")).unwrap_err();
    assert!(err.detail.contains("merge-base"));
}

#[test]
fn test_parse_unknown_revision() {
    let (repo, _commits) = linear_repo();
    let store = Store::open(repo.path()).unwrap();
    assert!(revspec::parse(&store, Some("no-such-branch")).is_err());
}

#[test]
fn test_enumerate_parents_first() {
    let (repo, commits) = linear_repo();
    let store = Store::open(repo.path()).unwrap();
    let range = RevisionRange::Single(commit_id(commits[3]));
    let enumerated = revspec::enumerate(&store, &range).unwrap();
    let expected: Vec<_> = commits.iter().map(|oid| commit_id(*oid)).collect();
    assert_eq!(enumerated, expected);
}

#[test]
fn test_enumerate_range_excludes_from() {
    let (repo, commits) = linear_repo();
    let store = Store::open(repo.path()).unwrap();
    let range = RevisionRange::Range {
        from: commit_id(commits[1]),
        to: commit_id(commits[3]),
    };
    let enumerated = revspec::enumerate(&store, &range).unwrap();
    assert_eq!(
        enumerated,
        vec![commit_id(commits[2]), commit_id(commits[3])]
    );
}

#[test]
fn test_enumerate_merge_graph_parents_first() {
    let repo = TestRepo::init();
    let base = repo.commit(&[], &[("file", b"base")], "base\n");
    let left = repo.commit(&[base], &[("file", b"base"), ("left", b"l")], "left\n");
    let right = repo.commit(&[base], &[("file", b"base"), ("right", b"r")], "right\n");
    let merge = repo.commit(
        &[left, right],
        &[("file", b"base"), ("left", b"l"), ("right", b"r")],
        "merge\n",
    );
    let store = Store::open(repo.path()).unwrap();
    let enumerated = revspec::enumerate(&store, &RevisionRange::Single(commit_id(merge))).unwrap();
    let position = |oid: git2::Oid| {
        enumerated
            .iter()
            .position(|id| *id == commit_id(oid))
            .unwrap()
    };
    assert_eq!(enumerated.len(), 4);
    assert_eq!(position(base), 0);
    assert_eq!(position(merge), 3);
    assert!(position(left) < position(merge));
    assert!(position(right) < position(merge));
}
