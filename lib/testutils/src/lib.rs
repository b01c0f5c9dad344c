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

use std::path::{Path, PathBuf};
use std::sync::Once;

use tempfile::TempDir;

pub fn hermetic_libgit2() {
    // Blank out every libgit2 config search path so the developer's own
    // git configuration (init.defaultBranch and friends) cannot leak into
    // test repositories. set_search_path is not thread-safe, hence the
    // `Once`.
    static CONFIGURE_GIT2: Once = Once::new();
    CONFIGURE_GIT2.call_once(|| unsafe {
        git2::opts::set_search_path(git2::ConfigLevel::System, "").unwrap();
        git2::opts::set_search_path(git2::ConfigLevel::Global, "").unwrap();
        git2::opts::set_search_path(git2::ConfigLevel::XDG, "").unwrap();
        git2::opts::set_search_path(git2::ConfigLevel::ProgramData, "").unwrap();
    });
}

pub fn new_temp_dir() -> TempDir {
    hermetic_libgit2();
    tempfile::Builder::new()
        .prefix("git-sift-test-")
        .tempdir()
        .unwrap()
}

/// A scratch git repository with helpers for building commit graphs.
pub struct TestRepo {
    _temp_dir: TempDir,
    pub repo: git2::Repository,
}

impl TestRepo {
    pub fn init() -> Self {
        let temp_dir = new_temp_dir();
        let repo = git2::Repository::init(temp_dir.path()).unwrap();
        TestRepo {
            _temp_dir: temp_dir,
            repo,
        }
    }

    pub fn path(&self) -> &Path {
        self.repo.workdir().unwrap()
    }

    pub fn path_buf(&self) -> PathBuf {
        self.path().to_path_buf()
    }

    /// Creates a commit whose tree holds exactly `files` (nested paths
    /// allowed) and advances `refs/heads/master` and HEAD to it.
    pub fn commit(
        &self,
        parents: &[git2::Oid],
        files: &[(&str, &[u8])],
        message: &str,
    ) -> git2::Oid {
        let tree_id = self.write_tree(files);
        self.commit_with_tree(parents, tree_id, message)
    }

    pub fn commit_with_tree(
        &self,
        parents: &[git2::Oid],
        tree_id: git2::Oid,
        message: &str,
    ) -> git2::Oid {
        let signature = git2::Signature::new(
            "Test User",
            "test.user@example.com",
            // A fixed time keeps rewritten commits reproducible.
            &git2::Time::new(1_700_000_000, 0),
        )
        .unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();
        let parents: Vec<_> = parents
            .iter()
            .map(|oid| self.repo.find_commit(*oid).unwrap())
            .collect();
        let parent_refs: Vec<_> = parents.iter().collect();
        let commit_id = self
            .repo
            .commit(None, &signature, &signature, message, &tree, &parent_refs)
            .unwrap();
        self.repo
            .reference("refs/heads/master", commit_id, true, "test commit")
            .unwrap();
        self.repo.set_head("refs/heads/master").unwrap();
        commit_id
    }

    /// Builds a tree (with nested directories) from path/contents pairs.
    pub fn write_tree(&self, files: &[(&str, &[u8])]) -> git2::Oid {
        fn build_dir(
            repo: &git2::Repository,
            entries: &[(Vec<&str>, git2::Oid)],
        ) -> git2::Oid {
            let mut builder = repo.treebuilder(None).unwrap();
            let mut dir_names: Vec<&str> = entries
                .iter()
                .filter(|(components, _)| components.len() > 1)
                .map(|(components, _)| components[0])
                .collect();
            dir_names.sort_unstable();
            dir_names.dedup();
            for (components, blob_id) in entries {
                if let [name] = components.as_slice() {
                    builder.insert(name, *blob_id, 0o100644).unwrap();
                }
            }
            for dir_name in dir_names {
                let sub_entries: Vec<_> = entries
                    .iter()
                    .filter(|(components, _)| {
                        components.len() > 1 && components[0] == dir_name
                    })
                    .map(|(components, blob_id)| (components[1..].to_vec(), *blob_id))
                    .collect();
                let sub_tree_id = build_dir(repo, &sub_entries);
                builder.insert(dir_name, sub_tree_id, 0o040000).unwrap();
            }
            builder.write().unwrap()
        }

        let entries: Vec<(Vec<&str>, git2::Oid)> = files
            .iter()
            .map(|(path, contents)| {
                let blob_id = self.repo.blob(contents).unwrap();
                (path.split('/').collect(), blob_id)
            })
            .collect();
        build_dir(&self.repo, &entries)
    }

    pub fn branch_tip(&self, branch: &str) -> Option<git2::Oid> {
        self.repo
            .find_reference(&format!("refs/heads/{branch}"))
            .ok()
            .and_then(|reference| reference.target())
    }

    /// All leaf paths of a commit's tree, sorted.
    pub fn tree_paths(&self, commit_id: git2::Oid) -> Vec<String> {
        let commit = self.repo.find_commit(commit_id).unwrap();
        let tree = commit.tree().unwrap();
        let mut paths = vec![];
        tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() != Some(git2::ObjectType::Tree) {
                paths.push(format!("{dir}{}", entry.name().unwrap()));
            }
            git2::TreeWalkResult::Ok
        })
        .unwrap();
        paths.sort();
        paths
    }

    /// Commit ids of the branch's ancestry, tip first, following first
    /// parents.
    pub fn first_parent_log(&self, branch: &str) -> Vec<git2::Oid> {
        let mut log = vec![];
        let mut next = self.branch_tip(branch);
        while let Some(oid) = next {
            log.push(oid);
            let commit = self.repo.find_commit(oid).unwrap();
            next = commit.parent_id(0).ok();
        }
        log
    }

    pub fn message_of(&self, commit_id: git2::Oid) -> String {
        self.repo
            .find_commit(commit_id)
            .unwrap()
            .message()
            .unwrap()
            .to_string()
    }
}
