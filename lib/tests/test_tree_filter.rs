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

use indoc::indoc;
use sift_lib::driver::{run, RewriteParams};
use testutils::TestRepo;

fn params(repo: &TestRepo, branch: &str) -> RewriteParams {
    RewriteParams {
        repo_path: Some(repo.path_buf()),
        branch: branch.to_string(),
        ..Default::default()
    }
}

#[test]
fn test_scripted_rule_order() {
    let repo = TestRepo::init();
    repo.commit(
        &[],
        &[("a.txt", b"a"), ("b.txt", b"b"), ("c.txt", b"c")],
        "files\n",
    );
    let mut params = params(&repo, "filtered");
    params.keep_rules = indoc! {"
        a.txt => entry.discard = false
        * => entry.discard = true
    "}
    .to_string();
    run(&params).unwrap();

    let tip = repo.branch_tip("filtered").unwrap();
    assert_eq!(repo.tree_paths(tip), vec!["a.txt"]);
}

#[test]
fn test_binary_size_keep() {
    let repo = TestRepo::init();
    repo.commit(
        &[],
        &[
            ("small.txt", b"12345678".as_slice()),
            ("big.txt", &[b'x'; 50]),
            ("img.bin", b"ab\0cd"),
        ],
        "files\n",
    );
    let mut params = params(&repo, "filtered");
    params.keep_rules = "* => entry.discard = entry.is_binary || entry.size > 10\n".to_string();
    run(&params).unwrap();

    let tip = repo.branch_tip("filtered").unwrap();
    assert_eq!(repo.tree_paths(tip), vec!["small.txt"]);
}

#[test]
fn test_remove_with_exception_in_every_commit() {
    let repo = TestRepo::init();
    let all_files: &[(&str, &[u8])] = &[
        ("Test1/a1.txt", b"1"),
        ("Test1/a2.txt", b"2"),
        ("Test1/b.txt", b"3"),
        ("Test2/a2.txt", b"4"),
        ("Test2/c.txt", b"5"),
        ("top.txt", b"6"),
    ];
    let c1 = repo.commit(&[], all_files, "all files\n");
    let mut changed = all_files.to_vec();
    changed[0].1 = b"1 changed";
    repo.commit(&[c1], &changed, "change a1\n");

    let mut params = params(&repo, "filtered");
    params.keep_rules = "/Test[12]\n".to_string();
    params.remove_rules = indoc! {"
        *
        !a[12].txt
    "}
    .to_string();
    run(&params).unwrap();

    let expected = vec!["Test1/a1.txt", "Test1/a2.txt", "Test2/a2.txt"];
    let log = repo.first_parent_log("filtered");
    assert_eq!(log.len(), 2);
    for oid in log {
        assert_eq!(repo.tree_paths(oid), expected);
    }
}

#[test]
fn test_keep_patterns_drop_unmatched_files() {
    let repo = TestRepo::init();
    repo.commit(
        &[],
        &[("src/lib.rs", b"l"), ("src/main.rs", b"m"), ("notes.md", b"n")],
        "files\n",
    );
    let mut params = params(&repo, "filtered");
    params.keep_rules = "/src\n".to_string();
    run(&params).unwrap();

    let tip = repo.branch_tip("filtered").unwrap();
    assert_eq!(repo.tree_paths(tip), vec!["src/lib.rs", "src/main.rs"]);
}

#[test]
fn test_scripted_remove_can_unremove() {
    let repo = TestRepo::init();
    repo.commit(&[], &[("keep.log", b"k"), ("drop.log", b"d")], "logs\n");
    let mut params = params(&repo, "filtered");
    // The script re-admits one path that the remove polarity would evict.
    params.remove_rules = indoc! {r#"
        *.log {%
        entry.discard = entry.name != "keep.log"
        %}
    "#}
    .to_string();
    run(&params).unwrap();

    let tip = repo.branch_tip("filtered").unwrap();
    assert_eq!(repo.tree_paths(tip), vec!["keep.log"]);
}

#[test]
fn test_replacement_blob_in_rewritten_tree() {
    let repo = TestRepo::init();
    repo.commit(
        &[],
        &[("secret.txt", b"password"), ("plain.txt", b"ok")],
        "files\n",
    );
    let mut params = params(&repo, "filtered");
    params.keep_rules = indoc! {r#"
        secret.txt {% entry.content = "redacted" %}
        plain.txt
    "#}
    .to_string();
    run(&params).unwrap();

    let tip = repo.branch_tip("filtered").unwrap();
    assert_eq!(repo.tree_paths(tip), vec!["plain.txt", "secret.txt"]);
    let commit = repo.repo.find_commit(tip).unwrap();
    let tree = commit.tree().unwrap();
    let entry = tree.get_path(std::path::Path::new("secret.txt")).unwrap();
    let blob = repo.repo.find_blob(entry.id()).unwrap();
    assert_eq!(blob.content(), b"redacted");
}
