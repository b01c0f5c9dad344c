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

//! Revision-range parsing and commit enumeration.

use git2::Oid;
use thiserror::Error;

use crate::object_id::ObjectId as _;
use crate::store::{CommitId, Store, StoreResult};

/// The commits to process: everything reachable from a single tip, or
/// reachable from `to` but not from `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionRange {
    Single(CommitId),
    Range { from: CommitId, to: CommitId },
}

#[derive(Debug, Error)]
#[error("{detail}")]
pub struct RevspecError {
    pub detail: String,
}

impl From<git2::Error> for RevspecError {
    fn from(err: git2::Error) -> Self {
        RevspecError {
            detail: err.message().to_string(),
        }
    }
}

/// Parses a revspec. Empty or absent input means `HEAD`; merge-base
/// forms (`a...b`) are rejected.
pub fn parse(store: &Store, spec: Option<&str>) -> Result<RevisionRange, RevspecError> {
    let repo = store.locked_repo();
    let spec = match spec {
        None | Some("") => {
            let head = repo.head()?.peel_to_commit()?;
            return Ok(RevisionRange::Single(CommitId::from_bytes(
                head.id().as_bytes(),
            )));
        }
        Some(spec) => spec,
    };
    let parsed = repo.revparse(spec)?;
    if parsed.mode().contains(git2::RevparseMode::MERGE_BASE) {
        return Err(RevspecError {
            detail: format!("merge-base revspecs are not supported: {spec}"),
        });
    }
    let commit_id = |object: Option<&git2::Object<'_>>| -> Result<CommitId, RevspecError> {
        let object = object.ok_or_else(|| RevspecError {
            detail: format!("incomplete revspec: {spec}"),
        })?;
        let commit = object.peel(git2::ObjectType::Commit)?;
        Ok(CommitId::from_bytes(commit.id().as_bytes()))
    };
    if parsed.mode().contains(git2::RevparseMode::RANGE) {
        Ok(RevisionRange::Range {
            from: commit_id(parsed.from())?,
            to: commit_id(parsed.to())?,
        })
    } else {
        Ok(RevisionRange::Single(commit_id(parsed.from())?))
    }
}

/// Enumerates the range in topological-reverse order: parents before
/// children, ties broken by the object database's own ordering.
pub fn enumerate(store: &Store, range: &RevisionRange) -> StoreResult<Vec<CommitId>> {
    let repo = store.locked_repo();
    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;
    match range {
        RevisionRange::Single(id) => {
            revwalk.push(Oid::from_bytes(id.as_bytes())?)?;
        }
        RevisionRange::Range { from, to } => {
            revwalk.push(Oid::from_bytes(to.as_bytes())?)?;
            revwalk.hide(Oid::from_bytes(from.as_bytes())?)?;
        }
    }
    let mut commits = vec![];
    for oid in revwalk {
        commits.push(CommitId::from_bytes(oid?.as_bytes()));
    }
    Ok(commits)
}
