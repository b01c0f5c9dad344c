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

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::{Debug, Error, Formatter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use git2::Oid;
use thiserror::Error as ThisError;

use crate::object_id::{id_type, ObjectId as _};

id_type!(pub CommitId);
id_type!(pub TreeId);
id_type!(pub FileId);

#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct MillisSinceEpoch(pub u64);

#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Timestamp {
    pub timestamp: MillisSinceEpoch,
    // time zone offset in minutes
    pub tz_offset: i32,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

/// A commit as read from (or about to be written to) the object database.
///
/// The id is not part of the value; reads are keyed by it and writes
/// produce it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Commit {
    pub parents: Vec<CommitId>,
    pub tree: TreeId,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
}

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum TreeValue {
    File { id: FileId, executable: bool },
    Symlink(FileId),
    Tree(TreeId),
    Submodule(CommitId),
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct Tree {
    entries: BTreeMap<String, TreeValue>,
}

impl Tree {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &TreeValue)> {
        self.entries.iter()
    }

    pub fn set(&mut self, name: String, value: TreeValue) {
        self.entries.insert(name, value);
    }

    pub fn value(&self, name: &str) -> Option<&TreeValue> {
        self.entries.get(name)
    }
}

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("Object not found")]
    NotFound,
    #[error("Unexpected file mode {0:o}")]
    UnexpectedFileMode(i32),
    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<git2::Error> for StoreError {
    fn from(err: git2::Error) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => StoreError::NotFound,
            _other => StoreError::Other(err.to_string()),
        }
    }
}

const HASH_LENGTH: usize = 20;
const EMPTY_TREE_ID_HEX: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// The source repository's object database.
///
/// Reads happen from many worker threads during the tree walk; all access
/// goes through a single mutex, which also serialises object writes.
pub struct Store {
    repo: Mutex<git2::Repository>,
    empty_tree_id: TreeId,
}

impl Debug for Store {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_struct("Store")
            .field("path", &self.repo.lock().unwrap().path())
            .finish()
    }
}

fn signature_from_git(signature: git2::Signature) -> Signature {
    let name = signature.name().unwrap_or("<no name>").to_owned();
    let email = signature.email().unwrap_or("<no email>").to_owned();
    let timestamp = MillisSinceEpoch((signature.when().seconds() * 1000) as u64);
    let tz_offset = signature.when().offset_minutes();
    Signature {
        name,
        email,
        timestamp: Timestamp {
            timestamp,
            tz_offset,
        },
    }
}

fn signature_to_git(signature: &Signature) -> StoreResult<git2::Signature<'static>> {
    let time = git2::Time::new(
        (signature.timestamp.timestamp.0 / 1000) as i64,
        signature.timestamp.tz_offset,
    );
    Ok(git2::Signature::new(
        &signature.name,
        &signature.email,
        &time,
    )?)
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let repo = git2::Repository::open(path)?;
        Ok(Self::from_repo(repo))
    }

    /// Walks up from `path` looking for a repository, like git itself does.
    pub fn discover(path: &Path) -> StoreResult<Self> {
        let repo = git2::Repository::discover(path)?;
        Ok(Self::from_repo(repo))
    }

    fn from_repo(repo: git2::Repository) -> Self {
        Store {
            repo: Mutex::new(repo),
            empty_tree_id: TreeId::new(hex::decode(EMPTY_TREE_ID_HEX).unwrap()),
        }
    }

    pub(crate) fn locked_repo(&self) -> MutexGuard<'_, git2::Repository> {
        self.repo.lock().unwrap()
    }

    pub fn empty_tree_id(&self) -> &TreeId {
        &self.empty_tree_id
    }

    pub fn read_commit(&self, id: &CommitId) -> StoreResult<Commit> {
        if id.as_bytes().len() != HASH_LENGTH {
            return Err(StoreError::NotFound);
        }
        let locked_repo = self.locked_repo();
        let commit = locked_repo.find_commit(Oid::from_bytes(id.as_bytes())?)?;
        let parents = commit
            .parent_ids()
            .map(|oid| CommitId::from_bytes(oid.as_bytes()))
            .collect();
        let tree = TreeId::from_bytes(commit.tree_id().as_bytes());
        let message = commit.message().unwrap_or("<no message>").to_owned();
        let author = signature_from_git(commit.author());
        let committer = signature_from_git(commit.committer());
        Ok(Commit {
            parents,
            tree,
            message,
            author,
            committer,
        })
    }

    pub fn write_commit(&self, contents: &Commit) -> StoreResult<CommitId> {
        let locked_repo = self.locked_repo();
        let git_tree = locked_repo.find_tree(Oid::from_bytes(contents.tree.as_bytes())?)?;
        let author = signature_to_git(&contents.author)?;
        let committer = signature_to_git(&contents.committer)?;
        let mut parents = vec![];
        for parent_id in &contents.parents {
            parents.push(locked_repo.find_commit(Oid::from_bytes(parent_id.as_bytes())?)?);
        }
        let parent_refs: Vec<_> = parents.iter().collect();
        let git_id = locked_repo.commit(
            None,
            &author,
            &committer,
            &contents.message,
            &git_tree,
            &parent_refs,
        )?;
        Ok(CommitId::from_bytes(git_id.as_bytes()))
    }

    pub fn read_tree(&self, id: &TreeId) -> StoreResult<Tree> {
        if id == &self.empty_tree_id {
            return Ok(Tree::default());
        }
        if id.as_bytes().len() != HASH_LENGTH {
            return Err(StoreError::NotFound);
        }
        let locked_repo = self.locked_repo();
        let git_tree = locked_repo.find_tree(Oid::from_bytes(id.as_bytes())?)?;
        let mut tree = Tree::default();
        for entry in git_tree.iter() {
            let name = entry
                .name()
                .ok_or_else(|| StoreError::Other("non-utf8 tree entry name".to_string()))?;
            let value = match entry.filemode() {
                0o100644 => TreeValue::File {
                    id: FileId::from_bytes(entry.id().as_bytes()),
                    executable: false,
                },
                0o100755 => TreeValue::File {
                    id: FileId::from_bytes(entry.id().as_bytes()),
                    executable: true,
                },
                0o120000 => TreeValue::Symlink(FileId::from_bytes(entry.id().as_bytes())),
                0o040000 => TreeValue::Tree(TreeId::from_bytes(entry.id().as_bytes())),
                0o160000 => TreeValue::Submodule(CommitId::from_bytes(entry.id().as_bytes())),
                mode => {
                    return Err(StoreError::UnexpectedFileMode(mode));
                }
            };
            tree.set(name.to_string(), value);
        }
        Ok(tree)
    }

    pub fn write_tree(&self, contents: &Tree) -> StoreResult<TreeId> {
        let locked_repo = self.locked_repo();
        let mut builder = locked_repo.treebuilder(None)?;
        for (name, value) in contents.entries() {
            let (id, filemode) = match value {
                TreeValue::File {
                    id,
                    executable: false,
                } => (id.as_bytes(), 0o100644),
                TreeValue::File {
                    id,
                    executable: true,
                } => (id.as_bytes(), 0o100755),
                TreeValue::Symlink(id) => (id.as_bytes(), 0o120000),
                TreeValue::Tree(id) => (id.as_bytes(), 0o040000),
                TreeValue::Submodule(id) => (id.as_bytes(), 0o160000),
            };
            builder.insert(name, Oid::from_bytes(id)?, filemode)?;
        }
        let oid = builder.write()?;
        Ok(TreeId::from_bytes(oid.as_bytes()))
    }

    pub fn write_blob(&self, contents: &[u8]) -> StoreResult<FileId> {
        let locked_repo = self.locked_repo();
        let oid = locked_repo.blob(contents)?;
        Ok(FileId::from_bytes(oid.as_bytes()))
    }

    /// Size and binary-ness of a blob, without keeping its contents around.
    pub fn blob_info(&self, id: &FileId) -> StoreResult<(u64, bool)> {
        let locked_repo = self.locked_repo();
        let blob = locked_repo.find_blob(Oid::from_bytes(id.as_bytes())?)?;
        Ok((blob.size() as u64, blob.is_binary()))
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        let locked_repo = self.locked_repo();
        let exists = locked_repo
            .find_reference(&format!("refs/heads/{name}"))
            .is_ok();
        exists
    }

    pub fn set_branch(&self, name: &str, target: &CommitId, force: bool) -> StoreResult<()> {
        let locked_repo = self.locked_repo();
        locked_repo.reference(
            &format!("refs/heads/{name}"),
            Oid::from_bytes(target.as_bytes())?,
            force,
            "git-sift rewrite",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> (tempfile::TempDir, Store) {
        let temp_dir = tempfile::tempdir().unwrap();
        git2::Repository::init(temp_dir.path()).unwrap();
        let store = Store::open(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    fn signature(seconds: u64) -> Signature {
        Signature {
            name: "Someone".to_string(),
            email: "someone@example.com".to_string(),
            timestamp: Timestamp {
                timestamp: MillisSinceEpoch(seconds * 1000),
                tz_offset: 60,
            },
        }
    }

    #[test]
    fn test_write_read_commit_round_trip() {
        let (_temp_dir, store) = init_repo();
        let file_id = store.write_blob(b"content").unwrap();
        let mut tree = Tree::default();
        tree.set(
            "file.txt".to_string(),
            TreeValue::File {
                id: file_id,
                executable: false,
            },
        );
        let tree_id = store.write_tree(&tree).unwrap();
        let commit = Commit {
            parents: vec![],
            tree: tree_id.clone(),
            message: "initial\n".to_string(),
            author: signature(1000),
            committer: signature(2000),
        };
        let commit_id = store.write_commit(&commit).unwrap();
        let read_back = store.read_commit(&commit_id).unwrap();
        assert_eq!(read_back, commit);
        assert_eq!(store.read_tree(&tree_id).unwrap(), tree);
    }

    #[test]
    fn test_read_empty_tree() {
        let (_temp_dir, store) = init_repo();
        let empty_tree_id = store.empty_tree_id().clone();
        let tree = store.read_tree(&empty_tree_id).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_blob_info() {
        let (_temp_dir, store) = init_repo();
        let text_id = store.write_blob(b"12345678").unwrap();
        assert_eq!(store.blob_info(&text_id).unwrap(), (8, false));
        let binary_id = store.write_blob(b"ab\0cd").unwrap();
        assert_eq!(store.blob_info(&binary_id).unwrap(), (5, true));
    }

    #[test]
    fn test_set_branch() {
        let (_temp_dir, store) = init_repo();
        let tree_id = store.write_tree(&Tree::default()).unwrap();
        let commit_id = store
            .write_commit(&Commit {
                parents: vec![],
                tree: tree_id,
                message: "empty\n".to_string(),
                author: signature(0),
                committer: signature(0),
            })
            .unwrap();
        assert!(!store.branch_exists("filtered"));
        store.set_branch("filtered", &commit_id, false).unwrap();
        assert!(store.branch_exists("filtered"));
    }
}
