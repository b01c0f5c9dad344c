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

//! The seam between the rewrite engine and user predicates.
//!
//! The engine only knows these traits and mutable working copies; the
//! embedded script language in [`crate::script`] is one implementation of
//! [`PredicateHost`], and an alternative evaluator can be plugged in
//! without touching the rewriter.

use thiserror::Error;

use crate::store::{Commit, CommitId, Signature, Store};

/// Working copy of a commit handed to predicates.
///
/// Everything except the id and the parent list is writable. Predicates
/// communicate back exclusively through these fields.
#[derive(Debug, Clone)]
pub struct MutableCommit {
    id: CommitId,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    /// When set by a predicate, the commit is dropped from the rewritten
    /// history and descendants re-map through its parents.
    pub discard: bool,
    /// Scratch slot for predicates; the engine never reads it.
    pub tag: Option<String>,
}

impl MutableCommit {
    pub fn new(id: CommitId, source: &Commit) -> Self {
        MutableCommit {
            id,
            author: source.author.clone(),
            committer: source.committer.clone(),
            message: source.message.clone(),
            discard: false,
            tag: None,
        }
    }

    pub fn id(&self) -> &CommitId {
        &self.id
    }
}

/// The modes a tree leaf can have in the rewritten tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File { executable: bool },
    Symlink,
    Submodule,
}

/// Immutable view of a tree leaf as seen by entry predicates.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Full slash-separated path from the tree root.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub kind: EntryKind,
    /// Blob size in bytes; submodule links report 0.
    pub size: u64,
    pub is_binary: bool,
}

/// Working copy of a tree leaf handed to entry predicates.
#[derive(Debug)]
pub struct MutableEntry {
    info: EntryInfo,
    /// Defaulted by the caller: false during the keep phase, true during
    /// the remove phase. A predicate flips it to override the phase's
    /// default action.
    pub discard: bool,
    replacement: Option<Vec<u8>>,
}

impl MutableEntry {
    pub fn new(info: EntryInfo, default_discard: bool) -> Self {
        MutableEntry {
            info,
            discard: default_discard,
            replacement: None,
        }
    }

    pub fn info(&self) -> &EntryInfo {
        &self.info
    }

    /// Replaces the entry's blob contents in the rewritten tree.
    pub fn set_content(&mut self, contents: Vec<u8>) {
        self.replacement = Some(contents);
    }

    pub(crate) fn take_replacement(&mut self) -> Option<Vec<u8>> {
        self.replacement.take()
    }
}

/// A user script failed to compile. The diagnostics carry line/column
/// information and an indented dump of the offending source.
#[derive(Debug, Error)]
#[error("{diagnostics}")]
pub struct PredicateCompileError {
    pub diagnostics: String,
}

/// A user script failed during evaluation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PredicateRuntimeError {
    pub message: String,
}

pub trait CommitPredicate: Send + Sync + std::fmt::Debug {
    fn invoke(
        &self,
        repo: &Store,
        commit: &mut MutableCommit,
    ) -> Result<(), PredicateRuntimeError>;
}

pub trait EntryPredicate: Send + Sync + std::fmt::Debug {
    fn invoke(
        &self,
        repo: &Store,
        pattern: &str,
        commit: &mut MutableCommit,
        entry: &mut MutableEntry,
    ) -> Result<(), PredicateRuntimeError>;
}

/// Compiles user predicate text into invocable predicate objects.
pub trait PredicateHost: Send + Sync {
    fn compile_commit(
        &self,
        text: &str,
    ) -> Result<Box<dyn CommitPredicate>, PredicateCompileError>;

    fn compile_entry(&self, text: &str) -> Result<Box<dyn EntryPredicate>, PredicateCompileError>;
}
